//! Fake collaborators shared by the unit tests of this crate.

use crate::attendance::{AttendanceError, AttendanceService, IdentityDirectory};
use crate::detector::{DetectorError, FaceDetector};
use crate::encoder::{EncoderError, FaceEncoder};
use crate::frame::Frame;
use crate::models::FaceModels;
use crate::types::{Embedding, FaceRegion, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory attendance log with injectable read/write failures.
#[derive(Default)]
pub struct MemoryAttendance {
    records: Mutex<HashMap<UserId, Vec<DateTime<Utc>>>>,
    fail_writes: AtomicU32,
    fail_reads: AtomicU32,
}

impl MemoryAttendance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: UserId, at: DateTime<Utc>) {
        self.records.lock().unwrap().entry(user_id).or_default().push(at);
    }

    pub fn records(&self, user_id: UserId) -> Vec<DateTime<Utc>> {
        self.records
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.records.lock().unwrap().values().map(Vec::len).sum()
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl AttendanceService for MemoryAttendance {
    fn mark_attended(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), AttendanceError> {
        if Self::take_failure(&self.fail_writes) {
            return Err(AttendanceError::Storage("disk full".into()));
        }
        self.insert(user_id, at);
        Ok(())
    }

    fn last_attendance_time(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, AttendanceError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(AttendanceError::Storage("database locked".into()));
        }
        Ok(self.records(user_id).into_iter().max())
    }
}

impl IdentityDirectory for MemoryAttendance {
    fn display_name(&self, user_id: UserId) -> Result<Option<String>, AttendanceError> {
        Ok(Some(format!("Student {user_id}")))
    }
}

/// Reports one face covering the whole frame for every non-empty frame.
#[derive(Default)]
pub struct WholeFrameDetector {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl FaceDetector for WholeFrameDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![FaceRegion {
            x: 0.0,
            y: 0.0,
            width: frame.width as f32,
            height: frame.height as f32,
            confidence: 0.99,
        }])
    }
}

/// One-dimensional embedding: mean crop brightness scaled to [0, 1].
#[derive(Default)]
pub struct BrightnessEncoder;

impl FaceEncoder for BrightnessEncoder {
    fn embed(&self, frame: &Frame, face: &FaceRegion) -> Result<Embedding, EncoderError> {
        let (crop, _, _) = frame.crop(face, 0.0).ok_or(EncoderError::EmptyCrop)?;
        let mean = crop.iter().map(|&p| p as f32).sum::<f32>() / crop.len() as f32;
        Ok(Embedding::new(vec![mean / 255.0]))
    }

    fn dimension(&self) -> usize {
        1
    }
}

pub fn fake_models() -> (FaceModels, Arc<WholeFrameDetector>) {
    let detector = Arc::new(WholeFrameDetector::default());
    let models = FaceModels::new(detector.clone(), Arc::new(BrightnessEncoder));
    (models, detector)
}

/// Uniform frame whose brightness encodes to `value / 255`.
pub fn uniform_frame(value: u8, sequence: u64) -> Frame {
    Frame::new(vec![value; 8 * 8], 8, 8, sequence)
}

pub fn brightness_embedding(value: u8) -> Embedding {
    Embedding::new(vec![value as f32 / 255.0])
}
