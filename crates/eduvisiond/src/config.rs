use eduvision_core::debounce::DebounceConfig;
use eduvision_core::encoder::DEFAULT_EMBEDDING_DIM;
use eduvision_core::worker::{WorkerConfig, DETECTION_SCALE};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Serialized gallery of enrolled embeddings.
    pub gallery_path: PathBuf,
    /// Enrollment photos, one sub-directory per user id.
    pub photo_dir: PathBuf,
    /// Write an empty gallery when none exists instead of refusing to start.
    pub create_gallery: bool,
    /// Directory of images replayed as the frame source. No producer when unset.
    pub frame_dir: Option<PathBuf>,
    /// Replay rate for `frame_dir`.
    pub frame_fps: u32,
    /// Euclidean distance below which a face matches a gallery entry.
    pub match_threshold: f32,
    /// Raw matches needed before attendance is written.
    pub recognition_threshold: u32,
    /// Minimum minutes between two attendance records for one user.
    pub cooldown_mins: i64,
    /// Consecutive commit failures before the feed reports the problem.
    pub max_commit_failures: u32,
    /// Factor frames are shrunk by before detection.
    pub detection_scale: u32,
    /// Encoder output size.
    pub embedding_dim: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `EDUVISION_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = eduvision_core::default_data_dir();
        let debounce = DebounceConfig::default();

        Self {
            model_dir: env_path("EDUVISION_MODEL_DIR").unwrap_or_else(eduvision_core::default_model_dir),
            db_path: env_path("EDUVISION_DB_PATH").unwrap_or_else(|| data_dir.join("attendance.db")),
            gallery_path: env_path("EDUVISION_GALLERY_PATH").unwrap_or_else(|| data_dir.join("gallery.json")),
            photo_dir: env_path("EDUVISION_PHOTO_DIR").unwrap_or_else(|| data_dir.join("person_data")),
            create_gallery: env_bool("EDUVISION_CREATE_GALLERY", false),
            frame_dir: env_path("EDUVISION_FRAME_DIR"),
            frame_fps: env_u32("EDUVISION_FRAME_FPS", 15).max(1),
            match_threshold: env_f32("EDUVISION_MATCH_THRESHOLD", eduvision_core::matcher::MATCH_THRESHOLD),
            recognition_threshold: env_u32("EDUVISION_RECOGNITION_THRESHOLD", debounce.threshold).max(1),
            cooldown_mins: env_i64("EDUVISION_COOLDOWN_MINS", debounce.cooldown.num_minutes()).max(0),
            max_commit_failures: env_u32("EDUVISION_MAX_COMMIT_FAILURES", debounce.max_commit_failures).max(1),
            detection_scale: env_u32("EDUVISION_DETECTION_SCALE", DETECTION_SCALE).max(1),
            embedding_dim: env_usize("EDUVISION_EMBEDDING_DIM", DEFAULT_EMBEDDING_DIM),
            bus: match std::env::var("EDUVISION_BUS").as_deref() {
                Ok("system") => BusKind::System,
                _ => BusKind::Session,
            },
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("face_detector.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the face embedding model.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join("face_encoder.onnx")
            .to_string_lossy()
            .into_owned()
    }

    pub fn worker_config(&self) -> WorkerConfig {
        let cooldown = chrono::Duration::try_minutes(self.cooldown_mins.max(0)).unwrap_or_else(|| {
            let fallback = DebounceConfig::default().cooldown;
            tracing::warn!(
                cooldown_mins = self.cooldown_mins,
                fallback_mins = fallback.num_minutes(),
                "cooldown out of range, using default"
            );
            fallback
        });
        WorkerConfig {
            match_threshold: self.match_threshold,
            detection_scale: self.detection_scale,
            debounce: DebounceConfig {
                threshold: self.recognition_threshold,
                cooldown,
                max_commit_failures: self.max_commit_failures,
                ..DebounceConfig::default()
            },
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| !matches!(v.as_str(), "0" | "false" | "no" | ""))
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_carries_thresholds() {
        let config = Config {
            recognition_threshold: 3,
            cooldown_mins: 45,
            max_commit_failures: 2,
            match_threshold: 0.5,
            detection_scale: 1,
            ..Config::from_env()
        };
        let worker = config.worker_config();
        assert_eq!(worker.debounce.threshold, 3);
        assert_eq!(worker.debounce.cooldown, chrono::Duration::minutes(45));
        assert_eq!(worker.debounce.max_commit_failures, 2);
        assert_eq!(worker.detection_scale, 1);
        assert!((worker.match_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cooldown_out_of_range() {
        let negative = Config {
            cooldown_mins: -10,
            ..Config::from_env()
        };
        assert_eq!(negative.worker_config().debounce.cooldown, chrono::Duration::zero());

        let huge = Config {
            cooldown_mins: i64::MAX,
            ..Config::from_env()
        };
        assert_eq!(huge.worker_config().debounce.cooldown, DebounceConfig::default().cooldown);
    }

    #[test]
    fn test_model_paths() {
        let config = Config {
            model_dir: PathBuf::from("/opt/models"),
            ..Config::from_env()
        };
        assert_eq!(config.detector_model_path(), "/opt/models/face_detector.onnx");
        assert_eq!(config.encoder_model_path(), "/opt/models/face_encoder.onnx");
    }
}
