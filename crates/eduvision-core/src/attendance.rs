//! Boundary between the debouncer and attendance persistence.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("unknown identity {0}")]
    UnknownIdentity(UserId),
    #[error("attendance storage failed: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Sole write path for attendance records.
///
/// `mark_attended` appends exactly one record per call and does not check
/// the cooldown; that is the debouncer's job. A write that cannot be made
/// durable must return an error, never succeed silently.
pub trait AttendanceService: Send + Sync {
    fn mark_attended(&self, user_id: UserId, at: DateTime<Utc>) -> Result<(), AttendanceError>;

    /// Most recent persisted attendance, `None` if the identity has none.
    fn last_attendance_time(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, AttendanceError>;
}

/// Human-readable names for identities shown on the recognition feed.
pub trait IdentityDirectory: Send + Sync {
    fn display_name(&self, user_id: UserId) -> Result<Option<String>, AttendanceError>;
}
