//! eduvision-core — Face-recognition attendance engine.
//!
//! Frames arrive through a latest-wins mailbox, faces are detected and
//! embedded with ONNX Runtime models, matched against an enrolled gallery,
//! and debounced into at most one attendance record per visit.

pub mod attendance;
pub mod controller;
pub mod debounce;
pub mod detector;
pub mod encoder;
pub mod enroll;
pub mod feed;
pub mod frame;
pub mod gallery;
pub mod mailbox;
pub mod matcher;
pub mod models;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use attendance::{AttendanceError, AttendanceService, IdentityDirectory};
pub use controller::{AttendanceController, ControllerError, ControllerStatus, WorkerState};
pub use enroll::{EnrollReport, Enroller};
pub use feed::{FeedEntry, FeedKind, RecognitionFeed};
pub use frame::Frame;
pub use gallery::{Gallery, GalleryStore};
pub use mailbox::FrameMailbox;
pub use models::FaceModels;
pub use types::{Embedding, FaceRegion, GalleryEntry, MatchResult, UserId};
pub use worker::{WorkerConfig, WorkerSummary};

/// Default model directory: `$XDG_DATA_HOME/eduvision/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    default_data_dir().join("models")
}

/// `$XDG_DATA_HOME/eduvision`, falling back to `~/.local/share/eduvision`.
pub fn default_data_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("eduvision")
}
