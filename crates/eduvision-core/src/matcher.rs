//! Nearest-neighbour identity matching against the gallery.

use crate::gallery::Gallery;
use crate::types::{Embedding, MatchResult};

/// Maximum Euclidean distance at which the nearest gallery entry is accepted.
pub const MATCH_THRESHOLD: f32 = 0.6;

/// Strategy for comparing a query embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery) -> MatchResult;
}

/// Euclidean nearest-neighbour matcher.
///
/// Scans every entry. On an exact tie the first entry in gallery order wins;
/// ties between different identities are not resolved in any meaningful way.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Embedding, gallery: &Gallery) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.entries().iter().enumerate() {
            // Embeddings from a different encoder are not comparable.
            if entry.embedding.dimension() != query.dimension() {
                continue;
            }
            let dist = query.euclidean_distance(&entry.embedding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < self.threshold => MatchResult {
                user_id: Some(gallery.entries()[idx].user_id),
                distance: best_dist,
            },
            _ => MatchResult::unknown(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GalleryEntry;

    fn entry(user_id: i64, values: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            user_id,
            embedding: Embedding::new(values),
        }
    }

    fn gallery(entries: Vec<GalleryEntry>) -> Gallery {
        Gallery::from_entries(entries).unwrap()
    }

    #[test]
    fn test_nearest_under_threshold_wins() {
        let query = Embedding::new(vec![0.0, 0.0]);
        // B listed first to show order does not beat distance
        let g = gallery(vec![entry(2, vec![0.5, 0.0]), entry(1, vec![0.25, 0.0])]);

        let result = EuclideanMatcher::default().compare(&query, &g);
        assert_eq!(result.user_id, Some(1));
        assert!((result.distance - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_all_at_or_above_threshold_is_unknown() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let g = gallery(vec![entry(1, vec![0.7, 0.0]), entry(2, vec![0.0, 0.9])]);

        let result = EuclideanMatcher::default().compare(&query, &g);
        assert!(!result.is_match());
        assert!((result.distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_distance_equal_to_threshold_is_unknown() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let g = gallery(vec![entry(1, vec![0.5, 0.0])]);
        let result = EuclideanMatcher::new(0.5).compare(&query, &g);
        assert!(!result.is_match());
    }

    #[test]
    fn test_tie_first_in_gallery_order_wins() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let g = gallery(vec![entry(7, vec![0.3, 0.0]), entry(8, vec![0.0, 0.3])]);

        let result = EuclideanMatcher::default().compare(&query, &g);
        assert_eq!(result.user_id, Some(7));
    }

    #[test]
    fn test_empty_gallery_is_unknown() {
        let query = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher::default().compare(&query, &Gallery::new());
        assert!(!result.is_match());
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_entries_of_other_dimension_never_match() {
        let query = Embedding::new(vec![0.1]);
        let g = gallery(vec![entry(9, vec![0.1, 5.0])]);
        let result = EuclideanMatcher::default().compare(&query, &g);
        assert!(!result.is_match());
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_best_match_last_entry_is_found() {
        let query = Embedding::new(vec![1.0, 0.0, 0.0]);
        let g = gallery(vec![
            entry(1, vec![0.0, 1.0, 0.0]),
            entry(2, vec![0.0, 0.0, 1.0]),
            entry(3, vec![1.0, 0.05, 0.0]),
        ]);
        let result = EuclideanMatcher::new(0.1).compare(&query, &g);
        assert_eq!(result.user_id, Some(3));
    }
}
