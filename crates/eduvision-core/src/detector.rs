//! Face detection: the collaborator contract and an ONNX Runtime
//! implementation for the Ultra-Light-Fast (RFB-320) face detector.
//!
//! The model takes a 320×240 RGB tensor and emits, per prior box, a
//! two-class score (`scores`, [1, N, 2]) and normalized corner coordinates
//! (`boxes`, [1, N, 4]).

use crate::frame::{resize_bilinear, Frame};
use crate::types::FaceRegion;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const DETECTOR_INPUT_WIDTH: usize = 320;
const DETECTOR_INPUT_HEIGHT: usize = 240;
const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DETECTOR_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a frame. Zero, one or many regions may come back.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Ultra-Light-Fast face detector via ONNX Runtime.
pub struct UltraFaceDetector {
    session: Mutex<Session>,
    scores_idx: usize,
    boxes_idx: usize,
}

impl UltraFaceDetector {
    /// Load the detector ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "face detector requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        // Exports name the tensors "scores" / "boxes"; otherwise assume that order.
        let scores_idx = output_names.iter().position(|n| n == "scores").unwrap_or(0);
        let boxes_idx = output_names.iter().position(|n| n == "boxes").unwrap_or(1);

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            scores_idx,
            boxes_idx,
            "loaded face detector model"
        );

        Ok(Self {
            session: Mutex::new(session),
            scores_idx,
            boxes_idx,
        })
    }

    /// Stretch the grayscale frame to the model input and normalize into NCHW.
    fn preprocess(frame: &Frame) -> Array4<f32> {
        let resized = resize_bilinear(
            &frame.data,
            frame.width as usize,
            frame.height as usize,
            DETECTOR_INPUT_WIDTH,
            DETECTOR_INPUT_HEIGHT,
        );

        let mut tensor = Array4::<f32>::zeros((1, 3, DETECTOR_INPUT_HEIGHT, DETECTOR_INPUT_WIDTH));
        for y in 0..DETECTOR_INPUT_HEIGHT {
            for x in 0..DETECTOR_INPUT_WIDTH {
                let v = (resized[y * DETECTOR_INPUT_WIDTH + x] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
                tensor[[0, 0, y, x]] = v;
                tensor[[0, 1, y, x]] = v;
                tensor[[0, 2, y, x]] = v;
            }
        }
        tensor
    }
}

impl FaceDetector for UltraFaceDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let input = Self::preprocess(frame);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("detector session poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[self.scores_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[self.boxes_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(
            scores,
            boxes,
            frame.width as f32,
            frame.height as f32,
            DETECTOR_CONFIDENCE_THRESHOLD,
        );
        Ok(nms(candidates, DETECTOR_NMS_THRESHOLD))
    }
}

/// Turn raw prior scores and normalized boxes into frame-space regions.
fn decode(scores: &[f32], boxes: &[f32], width: f32, height: f32, threshold: f32) -> Vec<FaceRegion> {
    let priors = (scores.len() / 2).min(boxes.len() / 4);
    let mut out = Vec::new();

    for i in 0..priors {
        let face_score = scores[i * 2 + 1];
        if face_score <= threshold {
            continue;
        }
        let x1 = boxes[i * 4].clamp(0.0, 1.0) * width;
        let y1 = boxes[i * 4 + 1].clamp(0.0, 1.0) * height;
        let x2 = boxes[i * 4 + 2].clamp(0.0, 1.0) * width;
        let y2 = boxes[i * 4 + 3].clamp(0.0, 1.0) * height;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        out.push(FaceRegion {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: face_score,
        });
    }

    out
}

/// Non-Maximum Suppression, highest confidence first.
fn nms(mut detections: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceRegion> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union between two regions.
fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
