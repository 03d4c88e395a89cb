use crate::detector::{DetectorError, FaceDetector, UltraFaceDetector};
use crate::encoder::{EncoderError, FaceEncoder, OnnxFaceEncoder};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("encoder: {0}")]
    Encoder(#[from] EncoderError),
}

/// Detector and encoder pair, constructed once and shared by reference
/// between the recognition worker and enrollment.
#[derive(Clone)]
pub struct FaceModels {
    pub detector: Arc<dyn FaceDetector>,
    pub encoder: Arc<dyn FaceEncoder>,
}

impl FaceModels {
    pub fn new(detector: Arc<dyn FaceDetector>, encoder: Arc<dyn FaceEncoder>) -> Self {
        Self { detector, encoder }
    }

    /// Load both ONNX models. Either one missing aborts the load.
    pub fn load_onnx(
        detector_path: &str,
        encoder_path: &str,
        embedding_dim: usize,
    ) -> Result<Self, ModelLoadError> {
        let detector = UltraFaceDetector::load(detector_path)?;
        let encoder = OnnxFaceEncoder::load(encoder_path, embedding_dim)?;
        Ok(Self::new(Arc::new(detector), Arc::new(encoder)))
    }
}
