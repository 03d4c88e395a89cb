//! Single-slot, latest-wins frame hand-off between the capture producer and
//! the recognition consumer.
//!
//! The producer never blocks: a new frame replaces any unread one. The
//! consumer blocks until a frame is available or the mailbox is closed.
//! Each frame is handed out at most once.

use crate::frame::Frame;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// What happened to a frame handed to [`FrameMailbox::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored in an empty slot.
    Stored,
    /// Stored, discarding an unread older frame.
    Replaced,
    /// Dropped because the mailbox is closed.
    Closed,
    /// The frame was empty; the mailbox is now closed.
    EndOfStream,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    closed: bool,
    replaced: u64,
}

#[derive(Default)]
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the newest frame and wake a waiting consumer.
    ///
    /// An empty frame is end of stream and closes the mailbox.
    pub fn put(&self, frame: Frame) -> PutOutcome {
        if frame.is_empty() {
            tracing::info!(sequence = frame.sequence, "empty frame from producer, closing mailbox");
            self.close();
            return PutOutcome::EndOfStream;
        }

        let mut slot = self.lock();
        if slot.closed {
            return PutOutcome::Closed;
        }
        let outcome = match slot.frame.replace(frame) {
            Some(stale) => {
                slot.replaced += 1;
                tracing::trace!(sequence = stale.sequence, "dropping unread frame");
                PutOutcome::Replaced
            }
            None => PutOutcome::Stored,
        };
        drop(slot);
        self.ready.notify_one();
        outcome
    }

    /// Block until a frame is available or the mailbox is closed.
    ///
    /// Returns `None` once closed; a frame left in the slot at close time is
    /// discarded, never delivered.
    pub fn take_blocking(&self) -> Option<Frame> {
        let slot = self.lock();
        let mut slot = self
            .ready
            .wait_while(slot, |s| s.frame.is_none() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if slot.closed {
            return None;
        }
        slot.frame.take()
    }

    /// Close the mailbox and wake every blocked consumer. Idempotent.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.frame = None;
        drop(slot);
        self.ready.notify_all();
    }

    /// Re-arm a closed mailbox for a new consumer run. Any frame left over
    /// from the previous run is discarded.
    pub fn reopen(&self) {
        let mut slot = self.lock();
        slot.closed = false;
        slot.frame = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of frames overwritten before the consumer read them.
    pub fn replaced_count(&self) -> u64 {
        self.lock().replaced
    }
}
