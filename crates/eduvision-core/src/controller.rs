//! Lifecycle controller for the recognition worker.
//!
//! `Stopped -> Running -> Stopping -> Stopped`. Gallery mutations go through
//! [`AttendanceController::update_gallery`], which quiesces the worker first
//! and resumes it afterwards, so the matcher never sees a gallery that is
//! being written.

use crate::attendance::{AttendanceService, IdentityDirectory};
use crate::enroll::{EnrollError, EnrollReport, Enroller};
use crate::feed::RecognitionFeed;
use crate::gallery::{Gallery, GalleryError, GalleryStore};
use crate::mailbox::FrameMailbox;
use crate::models::FaceModels;
use crate::types::UserId;
use crate::worker::{RecognitionWorker, WorkerConfig, WorkerContext, WorkerError, WorkerSummary};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("recognition is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: WorkerState,
    pub gallery_entries: usize,
    pub gallery_users: usize,
    pub frames_dropped: u64,
    pub feed_cursor: usize,
    pub last_run: Option<WorkerSummary>,
}

pub struct AttendanceController {
    mailbox: Arc<FrameMailbox>,
    models: FaceModels,
    gallery: Arc<Gallery>,
    store: GalleryStore,
    attendance: Arc<dyn AttendanceService>,
    directory: Arc<dyn IdentityDirectory>,
    feed: Arc<RecognitionFeed>,
    config: WorkerConfig,
    worker: Option<RecognitionWorker>,
    state: WorkerState,
    last_run: Option<WorkerSummary>,
}

impl AttendanceController {
    pub fn new(
        mailbox: Arc<FrameMailbox>,
        models: FaceModels,
        gallery: Gallery,
        store: GalleryStore,
        attendance: Arc<dyn AttendanceService>,
        directory: Arc<dyn IdentityDirectory>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            mailbox,
            models,
            gallery: Arc::new(gallery),
            store,
            attendance,
            directory,
            feed: Arc::new(RecognitionFeed::new()),
            config,
            worker: None,
            state: WorkerState::Stopped,
            last_run: None,
        }
    }

    /// Spawn a worker over the current gallery snapshot.
    pub fn start(&mut self) -> Result<(), ControllerError> {
        self.reap_finished();
        if self.worker.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        // Frames left over from a previous run are dropped here.
        self.mailbox.reopen();
        let ctx = WorkerContext {
            models: self.models.clone(),
            gallery: Arc::clone(&self.gallery),
            attendance: Arc::clone(&self.attendance),
            directory: Arc::clone(&self.directory),
            feed: Arc::clone(&self.feed),
            config: self.config.clone(),
        };
        self.worker = Some(RecognitionWorker::spawn(Arc::clone(&self.mailbox), ctx)?);
        self.state = WorkerState::Running;
        tracing::info!("recognition started");
        Ok(())
    }

    /// Stop the worker and wait for its thread to exit. A no-op when stopped.
    pub fn stop(&mut self) -> Result<Option<WorkerSummary>, ControllerError> {
        let Some(worker) = self.worker.take() else {
            self.state = WorkerState::Stopped;
            return Ok(None);
        };
        self.state = WorkerState::Stopping;
        let result = worker.stop();
        self.state = WorkerState::Stopped;

        let summary = result?;
        tracing::info!(frames = summary.frames, commits = summary.commits, "recognition stopped");
        self.last_run = Some(summary.clone());
        Ok(Some(summary))
    }

    pub fn restart(&mut self) -> Result<(), ControllerError> {
        self.stop()?;
        self.start()
    }

    pub fn state(&self) -> WorkerState {
        match &self.worker {
            Some(w) if w.is_finished() => WorkerState::Stopped,
            Some(_) => self.state,
            None => WorkerState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    pub fn feed(&self) -> Arc<RecognitionFeed> {
        Arc::clone(&self.feed)
    }

    pub fn gallery(&self) -> Arc<Gallery> {
        Arc::clone(&self.gallery)
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state(),
            gallery_entries: self.gallery.len(),
            gallery_users: self.gallery.user_ids().len(),
            frames_dropped: self.mailbox.replaced_count(),
            feed_cursor: self.feed.end_cursor(),
            last_run: self.last_run.clone(),
        }
    }

    /// Apply `f` to a copy of the gallery with recognition quiesced, persist
    /// it, and resume recognition if it was running. On any error the
    /// in-memory gallery is left unchanged.
    pub fn update_gallery<T, E>(&mut self, f: impl FnOnce(&mut Gallery) -> Result<T, E>) -> Result<T, ControllerError>
    where
        ControllerError: From<E>,
    {
        let was_running = self.is_running();
        self.stop()?;

        let outcome = self.apply_and_save(f);

        if was_running {
            self.start()?;
        }
        outcome
    }

    fn apply_and_save<T, E>(&mut self, f: impl FnOnce(&mut Gallery) -> Result<T, E>) -> Result<T, ControllerError>
    where
        ControllerError: From<E>,
    {
        let mut next = (*self.gallery).clone();
        let value = f(&mut next)?;
        self.store.save(&next)?;
        self.gallery = Arc::new(next);
        Ok(value)
    }

    /// Append `user_id`'s photos to the gallery.
    pub fn enroll(&mut self, enroller: &Enroller, user_id: UserId) -> Result<EnrollReport, ControllerError> {
        self.update_gallery(|gallery| enroller.enroll(gallery, user_id))
    }

    /// Replace the gallery with one built from scratch for `user_ids`.
    pub fn rebuild_gallery(
        &mut self,
        enroller: &Enroller,
        user_ids: &[UserId],
    ) -> Result<Vec<EnrollReport>, ControllerError> {
        self.update_gallery(|gallery| {
            let (fresh, reports) = enroller.rebuild(user_ids)?;
            *gallery = fresh;
            Ok::<_, EnrollError>(reports)
        })
    }

    pub fn remove_user_from_gallery(&mut self, user_id: UserId) -> Result<usize, ControllerError> {
        self.update_gallery(|gallery| Ok::<_, GalleryError>(gallery.remove_user(user_id)))
    }

    fn reap_finished(&mut self) {
        if self.worker.as_ref().is_some_and(RecognitionWorker::is_finished) {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "recognition worker ended abnormally");
            }
        }
    }
}

impl Drop for AttendanceController {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop recognition on shutdown");
        }
    }
}
