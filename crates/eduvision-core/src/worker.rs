//! Recognition consumer: takes frames from the mailbox, detects on a
//! down-scaled copy, embeds and matches at full resolution, and feeds the
//! debouncer. Runs on a dedicated OS thread and stops cooperatively.

use crate::attendance::{AttendanceService, IdentityDirectory};
use crate::debounce::{AttendanceDebouncer, DebounceConfig, DebounceError, Observation};
use crate::feed::{FeedEntry, FeedKind, RecognitionFeed};
use crate::frame::Frame;
use crate::gallery::Gallery;
use crate::mailbox::FrameMailbox;
use crate::matcher::{EuclideanMatcher, Matcher, MATCH_THRESHOLD};
use crate::models::FaceModels;
use crate::types::{MatchResult, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Detection runs on frames shrunk by this factor.
pub const DETECTION_SCALE: u32 = 2;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn recognition thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("recognition thread panicked")]
    Panicked,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub match_threshold: f32,
    pub detection_scale: u32,
    pub debounce: DebounceConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            match_threshold: MATCH_THRESHOLD,
            detection_scale: DETECTION_SCALE,
            debounce: DebounceConfig::default(),
        }
    }
}

/// Everything one worker run needs. The gallery is a read-only snapshot for
/// the lifetime of the run.
#[derive(Clone)]
pub struct WorkerContext {
    pub models: FaceModels,
    pub gallery: Arc<Gallery>,
    pub attendance: Arc<dyn AttendanceService>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub feed: Arc<RecognitionFeed>,
    pub config: WorkerConfig,
}

/// Counters for one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub frames: u64,
    pub faces: u64,
    pub matches: u64,
    pub commits: u64,
    pub last_sequence: Option<u64>,
}

/// What one frame produced.
#[derive(Debug, Default)]
pub struct FrameOutcome {
    pub faces: usize,
    pub matches: Vec<MatchResult>,
    pub commits: Vec<UserId>,
}

/// Per-frame detect → embed → match → debounce, single-threaded.
pub struct RecognitionPipeline {
    ctx: WorkerContext,
    matcher: EuclideanMatcher,
    debouncer: AttendanceDebouncer,
    labels: HashMap<UserId, String>,
    summary: WorkerSummary,
}

impl RecognitionPipeline {
    pub fn new(ctx: WorkerContext) -> Self {
        let matcher = EuclideanMatcher::new(ctx.config.match_threshold);
        let debouncer = AttendanceDebouncer::new(ctx.attendance.clone(), ctx.config.debounce.clone());
        Self {
            ctx,
            matcher,
            debouncer,
            labels: HashMap::new(),
            summary: WorkerSummary::default(),
        }
    }

    pub fn summary(&self) -> &WorkerSummary {
        &self.summary
    }

    pub fn debouncer(&self) -> &AttendanceDebouncer {
        &self.debouncer
    }

    pub fn process_frame(&mut self, frame: &Frame, now: DateTime<Utc>) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        self.summary.frames += 1;
        self.summary.last_sequence = Some(frame.sequence);

        if !frame.is_well_formed() {
            tracing::warn!(
                sequence = frame.sequence,
                width = frame.width,
                height = frame.height,
                bytes = frame.data.len(),
                "malformed frame, skipping"
            );
            return outcome;
        }

        let scale = self.ctx.config.detection_scale.max(1);
        let small = frame.downscale(scale);
        let regions = match self.ctx.models.detector.detect(&small) {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "face detection failed");
                return outcome;
            }
        };
        outcome.faces = regions.len();
        self.summary.faces += regions.len() as u64;

        for region in regions {
            let region = region.scaled(scale as f32);
            let embedding = match self.ctx.models.encoder.embed(frame, &region) {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, sequence = frame.sequence, "skipping face region");
                    continue;
                }
            };

            let result = self.matcher.compare(&embedding, &self.ctx.gallery);
            let Some(user_id) = result.user_id else {
                tracing::trace!(distance = result.distance, "face not in gallery");
                continue;
            };
            tracing::debug!(user_id, distance = result.distance, sequence = frame.sequence, "face matched");
            outcome.matches.push(result);
            self.summary.matches += 1;
            self.emit(user_id, FeedKind::Recognized, now);

            match self.debouncer.observe(user_id, now) {
                Ok(Observation::Committed) => {
                    self.summary.commits += 1;
                    outcome.commits.push(user_id);
                    self.emit(user_id, FeedKind::AttendanceMarked, now);
                }
                Ok(_) => {}
                Err(err @ DebounceError::Commit { failures, .. }) => {
                    let limit = self.ctx.config.debounce.max_commit_failures;
                    if failures >= limit {
                        tracing::error!(error = %err, "attendance write keeps failing");
                        if failures == limit {
                            self.emit(user_id, FeedKind::AttendanceFailing, now);
                        }
                    } else {
                        tracing::warn!(error = %err, "attendance write failed, will retry");
                    }
                }
                Err(err) => tracing::warn!(error = %err, "debounce lookup failed"),
            }
        }

        outcome
    }

    fn emit(&mut self, user_id: UserId, kind: FeedKind, at: DateTime<Utc>) {
        let label = self.label(user_id);
        self.ctx.feed.append(FeedEntry {
            user_id,
            label,
            kind,
            at,
        });
    }

    fn label(&mut self, user_id: UserId) -> String {
        if let Some(label) = self.labels.get(&user_id) {
            return label.clone();
        }
        match self.ctx.directory.display_name(user_id) {
            Ok(Some(name)) => {
                self.labels.insert(user_id, name.clone());
                name
            }
            Ok(None) => format!("user #{user_id}"),
            Err(e) => {
                tracing::debug!(user_id, error = %e, "display name lookup failed");
                format!("user #{user_id}")
            }
        }
    }
}

/// Handle to a running recognition thread.
pub struct RecognitionWorker {
    cancel: Arc<AtomicBool>,
    mailbox: Arc<FrameMailbox>,
    handle: JoinHandle<WorkerSummary>,
}

impl RecognitionWorker {
    /// Spawn the consumer loop on its own thread.
    pub fn spawn(mailbox: Arc<FrameMailbox>, ctx: WorkerContext) -> Result<Self, WorkerError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let thread_mailbox = Arc::clone(&mailbox);

        let handle = thread::Builder::new()
            .name("eduvision-recognition".into())
            .spawn(move || {
                tracing::info!(
                    gallery_entries = ctx.gallery.len(),
                    gallery_users = ctx.gallery.user_ids().len(),
                    "recognition worker started"
                );
                let mut pipeline = RecognitionPipeline::new(ctx);
                while !thread_cancel.load(Ordering::Acquire) {
                    let Some(frame) = thread_mailbox.take_blocking() else {
                        break;
                    };
                    if thread_cancel.load(Ordering::Acquire) {
                        break;
                    }
                    pipeline.process_frame(&frame, Utc::now());
                }
                let summary = pipeline.summary().clone();
                tracing::info!(
                    frames = summary.frames,
                    matches = summary.matches,
                    commits = summary.commits,
                    "recognition worker exiting"
                );
                summary
            })?;

        Ok(Self {
            cancel,
            mailbox,
            handle,
        })
    }

    /// True once the thread has exited on its own (end of stream) or after stop.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Raise the cancel flag, wake the consumer and wait for the thread to exit.
    pub fn stop(self) -> Result<WorkerSummary, WorkerError> {
        self.cancel.store(true, Ordering::Release);
        self.mailbox.close();
        self.handle.join().map_err(|_| WorkerError::Panicked)
    }
}
