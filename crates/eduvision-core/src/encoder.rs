//! Face embedding: the collaborator contract and an ONNX Runtime encoder
//! producing fixed-length descriptors compared by Euclidean distance.

use crate::frame::{resize_bilinear, Frame};
use crate::types::{Embedding, FaceRegion};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const ENCODER_INPUT_SIZE: usize = 150;
/// Fraction of the face box added on every side before cropping.
const ENCODER_CROP_PADDING: f32 = 0.25;
const ENCODER_MEAN: f32 = 127.5;
const ENCODER_STD: f32 = 127.5;
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps one face region to exactly one embedding.
pub trait FaceEncoder: Send + Sync {
    fn embed(&self, frame: &Frame, face: &FaceRegion) -> Result<Embedding, EncoderError>;

    /// Length of every embedding this encoder produces.
    fn dimension(&self) -> usize;
}

pub struct OnnxFaceEncoder {
    session: Mutex<Session>,
    dimension: usize,
    model_version: String,
}

impl OnnxFaceEncoder {
    /// Load the encoder ONNX model; `dimension` is the expected output length.
    pub fn load(model_path: &str, dimension: usize) -> Result<Self, EncoderError> {
        let path = Path::new(model_path);
        if !path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            dimension,
            "loaded face encoder model"
        );

        let model_version = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            session: Mutex::new(session),
            dimension,
            model_version,
        })
    }

    /// Normalize a square grayscale face chip into a NCHW float tensor.
    fn preprocess(chip: &[u8]) -> Array4<f32> {
        let size = ENCODER_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = chip.get(y * size + x).copied().unwrap_or(0) as f32;
                let v = (pixel - ENCODER_MEAN) / ENCODER_STD;
                tensor[[0, 0, y, x]] = v;
                tensor[[0, 1, y, x]] = v;
                tensor[[0, 2, y, x]] = v;
            }
        }

        tensor
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn embed(&self, frame: &Frame, face: &FaceRegion) -> Result<Embedding, EncoderError> {
        let (crop, w, h) = frame
            .crop(face, ENCODER_CROP_PADDING)
            .ok_or(EncoderError::EmptyCrop)?;
        let chip = resize_bilinear(&crop, w as usize, h as usize, ENCODER_INPUT_SIZE, ENCODER_INPUT_SIZE);
        let input = Self::preprocess(&chip);

        let mut session = self
            .session
            .lock()
            .map_err(|_| EncoderError::InferenceFailed("encoder session poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != self.dimension {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {}-dim embedding, got {}",
                self.dimension,
                raw.len()
            )));
        }

        Ok(Embedding {
            values: raw.to_vec(),
            model_version: Some(self.model_version.clone()),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape() {
        let chip = vec![128u8; ENCODER_INPUT_SIZE * ENCODER_INPUT_SIZE];
        let t = OnnxFaceEncoder::preprocess(&chip);
        assert_eq!(t.shape(), &[1, 3, ENCODER_INPUT_SIZE, ENCODER_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_symmetric_range() {
        let mut chip = vec![0u8; ENCODER_INPUT_SIZE * ENCODER_INPUT_SIZE];
        chip[1] = 255;
        let t = OnnxFaceEncoder::preprocess(&chip);
        assert!((t[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((t[[0, 2, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            OnnxFaceEncoder::load("/nonexistent/face_encoder.onnx", DEFAULT_EMBEDDING_DIM),
            Err(EncoderError::ModelNotFound(_))
        ));
    }
}
