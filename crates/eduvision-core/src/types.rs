use serde::{Deserialize, Serialize};

/// Identity key shared by the gallery, the debouncer and the user repository.
pub type UserId = i64;

/// Region of a frame containing one detected face, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    /// Scale all coordinates by `factor` (used to map detections made on a
    /// down-scaled frame back to full resolution).
    pub fn scaled(&self, factor: f32) -> FaceRegion {
        FaceRegion {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Face embedding vector (128-dimensional for the default encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding.
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings. Embeddings of
    /// different dimension are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.dimension() != other.dimension() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled photo of one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub user_id: UserId,
    pub embedding: Embedding,
}

/// Result of matching a query embedding against a gallery.
///
/// `user_id` is set only when the nearest entry lies under the match
/// threshold. `distance` is the nearest distance found, or infinity for an
/// empty gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub user_id: Option<UserId>,
    pub distance: f32,
}

impl MatchResult {
    pub fn unknown(distance: f32) -> Self {
        Self {
            user_id: None,
            distance,
        }
    }

    pub fn is_match(&self) -> bool {
        self.user_id.is_some()
    }
}
