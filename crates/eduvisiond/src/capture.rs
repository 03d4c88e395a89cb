//! Frame producer: replays the images of a directory into the mailbox at a
//! fixed rate, then signals end of stream with an empty frame.

use eduvision_core::mailbox::PutOutcome;
use eduvision_core::{Frame, FrameMailbox};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame directory {path}: {source}")]
    FrameDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame directory {0} contains no images")]
    Empty(PathBuf),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub produced: u64,
    pub replaced: u64,
    pub undecodable: u64,
}

pub struct FrameReplay {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<ReplayStats>,
}

impl FrameReplay {
    /// Start replaying `dir` into `mailbox` on its own thread.
    pub fn spawn(dir: &Path, fps: u32, mailbox: Arc<FrameMailbox>) -> Result<Self, CaptureError> {
        let files = list_images(dir)?;
        if files.is_empty() {
            return Err(CaptureError::Empty(dir.to_path_buf()));
        }
        tracing::info!(dir = %dir.display(), frames = files.len(), fps, "frame replay starting");

        let interval = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("eduvision-capture".into())
            .spawn(move || replay(&files, interval, &mailbox, &thread_stop))
            .map_err(CaptureError::Spawn)?;

        Ok(Self { stop, handle })
    }

    pub fn stop(self) -> ReplayStats {
        self.stop.store(true, Ordering::Release);
        self.handle.join().unwrap_or_else(|_| {
            tracing::error!("capture thread panicked");
            ReplayStats::default()
        })
    }
}

fn replay(files: &[PathBuf], interval: Duration, mailbox: &FrameMailbox, stop: &AtomicBool) -> ReplayStats {
    let mut stats = ReplayStats::default();
    let mut sequence = 0u64;
    let mut next_tick = Instant::now();

    for path in files {
        if stop.load(Ordering::Acquire) {
            return stats;
        }
        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping undecodable frame");
                stats.undecodable += 1;
                continue;
            }
        };

        let frame = Frame::from_image(&img, sequence);
        sequence += 1;
        stats.produced += 1;
        // Closed while recognition is stopped; frames are simply dropped.
        if mailbox.put(frame) == PutOutcome::Replaced {
            stats.replaced += 1;
        }

        next_tick += interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }

    tracing::info!(
        produced = stats.produced,
        replaced = stats.replaced,
        "frame source exhausted, signalling end of stream"
    );
    mailbox.put(Frame::end_of_stream(sequence));
    stats
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CaptureError> {
    let read = std::fs::read_dir(dir).map_err(|source| CaptureError::FrameDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files: Vec<PathBuf> = read
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && image::ImageFormat::from_path(p).is_ok())
        .collect();
    files.sort();
    Ok(files)
}
