//! Per-identity debounce turning bursty per-frame matches into at most one
//! attendance commit per visit.
//!
//! Each identity moves `Idle` (count 0) -> `Accumulating` (0 < count <
//! threshold) -> commit -> `Idle`. An observation is only counted when the
//! identity has no persisted attendance inside the cooldown window; echo
//! matches from a visit that is already recorded are discarded without
//! touching the counter.

use crate::attendance::{AttendanceError, AttendanceService};
use crate::types::UserId;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Raw matches required before attendance is committed.
pub const RECOGNITION_THRESHOLD: u32 = 5;
/// Minimum time between two committed attendances for one identity.
pub const COOLDOWN_MINUTES: i64 = 30;
/// Consecutive commit failures after which the worker escalates.
pub const MAX_COMMIT_FAILURES: u32 = 3;
/// Once escalated, minimum spacing between further commit attempts.
pub const COMMIT_RETRY_BACKOFF_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct DebounceConfig {
    pub threshold: u32,
    pub cooldown: Duration,
    pub max_commit_failures: u32,
    pub commit_retry_backoff: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            threshold: RECOGNITION_THRESHOLD,
            cooldown: Duration::minutes(COOLDOWN_MINUTES),
            max_commit_failures: MAX_COMMIT_FAILURES,
            commit_retry_backoff: Duration::seconds(COMMIT_RETRY_BACKOFF_SECS),
        }
    }
}

#[derive(Error, Debug)]
pub enum DebounceError {
    #[error("attendance lookup for user {user_id} failed: {source}")]
    Lookup {
        user_id: UserId,
        #[source]
        source: AttendanceError,
    },
    #[error("attendance commit for user {user_id} failed ({failures} in a row): {source}")]
    Commit {
        user_id: UserId,
        failures: u32,
        #[source]
        source: AttendanceError,
    },
}

/// Outcome of a single [`AttendanceDebouncer::observe`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Identity already has attendance inside the cooldown window.
    Discarded { last_attendance: DateTime<Utc> },
    /// Counted, below threshold.
    Counted { count: u32 },
    /// Attendance was written and the counter reset.
    Committed,
    /// Commit due but postponed: too many consecutive failures, backing off.
    Deferred { failures: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerState {
    pub raw_match_count: u32,
    pub last_counted_at: Option<DateTime<Utc>>,
    pub commit_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Owned by the single recognition consumer; needs no locking.
pub struct AttendanceDebouncer {
    service: Arc<dyn AttendanceService>,
    config: DebounceConfig,
    trackers: HashMap<UserId, TrackerState>,
}

impl AttendanceDebouncer {
    pub fn new(service: Arc<dyn AttendanceService>, config: DebounceConfig) -> Self {
        Self {
            service,
            config,
            trackers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// Feed one raw match for `user_id` observed at `now`.
    pub fn observe(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<Observation, DebounceError> {
        let last = self
            .service
            .last_attendance_time(user_id)
            .map_err(|source| DebounceError::Lookup { user_id, source })?;

        if let Some(last_attendance) = last {
            if now - last_attendance < self.config.cooldown {
                tracing::trace!(user_id, %last_attendance, "inside cooldown, discarding match");
                return Ok(Observation::Discarded { last_attendance });
            }
        }

        let state = self.trackers.entry(user_id).or_default();
        // Saturates at the threshold while a commit is failing or deferred.
        state.raw_match_count = (state.raw_match_count + 1).min(self.config.threshold);
        state.last_counted_at = Some(now);

        if state.raw_match_count < self.config.threshold {
            tracing::debug!(user_id, count = state.raw_match_count, "match counted");
            return Ok(Observation::Counted {
                count: state.raw_match_count,
            });
        }

        if state.commit_failures >= self.config.max_commit_failures {
            if let Some(failed_at) = state.last_failure_at {
                if now - failed_at < self.config.commit_retry_backoff {
                    return Ok(Observation::Deferred {
                        failures: state.commit_failures,
                    });
                }
            }
        }

        match self.service.mark_attended(user_id, now) {
            Ok(()) => {
                tracing::info!(user_id, matches = state.raw_match_count, "attendance marked");
                state.raw_match_count = 0;
                state.commit_failures = 0;
                state.last_failure_at = None;
                Ok(Observation::Committed)
            }
            Err(source) => {
                // Counter stays at the threshold so the next eligible match retries.
                state.commit_failures += 1;
                state.last_failure_at = Some(now);
                Err(DebounceError::Commit {
                    user_id,
                    failures: state.commit_failures,
                    source,
                })
            }
        }
    }

    pub fn count(&self, user_id: UserId) -> u32 {
        self.trackers
            .get(&user_id)
            .map(|s| s.raw_match_count)
            .unwrap_or(0)
    }

    pub fn state(&self, user_id: UserId) -> Option<&TrackerState> {
        self.trackers.get(&user_id)
    }
}
