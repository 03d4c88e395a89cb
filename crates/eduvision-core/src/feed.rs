//! Append-only feed of recognition events for the UI.
//!
//! The recognition worker appends; readers poll with a cursor and only ever
//! see entries in append order. Cursors are absolute, so trimming the oldest
//! entries never shifts what a reader has already seen.

use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// A raw match, emitted for every matched face regardless of debounce state.
    Recognized,
    /// Attendance was committed.
    AttendanceMarked,
    /// Attendance could not be written repeatedly.
    AttendanceFailing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    pub user_id: UserId,
    pub label: String,
    pub kind: FeedKind,
    pub at: DateTime<Utc>,
}

impl fmt::Display for FeedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FeedKind::Recognized => write!(f, "{} was recognized", self.label),
            FeedKind::AttendanceMarked => write!(f, "{} marked present", self.label),
            FeedKind::AttendanceFailing => {
                write!(f, "attendance for {} could not be saved", self.label)
            }
        }
    }
}

struct Entries {
    /// Absolute cursor of `items[0]`.
    base: usize,
    items: VecDeque<FeedEntry>,
}

pub struct RecognitionFeed {
    capacity: usize,
    inner: Mutex<Entries>,
}

impl Default for RecognitionFeed {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_FEED_CAPACITY)
    }
}

impl RecognitionFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` entries; older ones are dropped first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Entries {
                base: 0,
                items: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, entry: FeedEntry) {
        let mut inner = self.lock();
        inner.items.push_back(entry);
        while inner.items.len() > self.capacity {
            inner.items.pop_front();
            inner.base += 1;
        }
    }

    /// Entries appended at or after `cursor`, and the cursor to pass next time.
    pub fn since(&self, cursor: usize) -> (Vec<FeedEntry>, usize) {
        let inner = self.lock();
        let end = inner.base + inner.items.len();
        let start = cursor.clamp(inner.base, end) - inner.base;
        let entries = inner.items.iter().skip(start).cloned().collect();
        (entries, end)
    }

    /// Cursor one past the newest entry.
    pub fn end_cursor(&self) -> usize {
        let inner = self.lock();
        inner.base + inner.items.len()
    }
}
