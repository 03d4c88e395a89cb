use eduvision_core::{AttendanceController, Enroller, RecognitionFeed, UserId};
use eduvision_store::{NewUser, UserRepository};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zbus::interface;

/// D-Bus interface for the EduVision attendance daemon.
///
/// Bus name: org.eduvision.Attendance1
/// Object path: /org/eduvision/Attendance1
///
/// Structured results are returned as JSON strings.
pub struct AttendanceBus {
    controller: Arc<Mutex<AttendanceController>>,
    /// Same feed the controller's workers append to; read without the controller lock.
    feed: Arc<RecognitionFeed>,
    users: Arc<UserRepository>,
    enroller: Arc<Enroller>,
}

impl AttendanceBus {
    pub fn new(
        controller: Arc<Mutex<AttendanceController>>,
        users: Arc<UserRepository>,
        enroller: Arc<Enroller>,
    ) -> Self {
        let feed = lock(&controller).feed();
        Self {
            controller,
            feed,
            users,
            enroller,
        }
    }

    /// Run `f` against the controller on the blocking pool; stop and
    /// enrollment wait on the recognition thread.
    async fn with_controller<T, E>(
        &self,
        f: impl FnOnce(&mut AttendanceController) -> Result<T, E> + Send + 'static,
    ) -> zbus::fdo::Result<T>
    where
        T: Send + 'static,
        E: Display,
    {
        let controller = Arc::clone(&self.controller);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&controller);
            f(&mut guard).map_err(failed)
        })
        .await
        .map_err(failed)?
    }
}

fn lock(controller: &Mutex<AttendanceController>) -> MutexGuard<'_, AttendanceController> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

fn failed(e: impl Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_json(value: &impl serde::Serialize) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

/// JSON page of feed entries from `cursor`, plus the next cursor.
fn feed_page(feed: &RecognitionFeed, cursor: u64) -> zbus::fdo::Result<(String, u64)> {
    let (entries, next) = feed.since(usize::try_from(cursor).unwrap_or(usize::MAX));
    let entries: Vec<_> = entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "user_id": e.user_id,
                "kind": e.kind,
                "at": e.at,
                "text": e.to_string(),
            })
        })
        .collect();
    Ok((to_json(&entries)?, next as u64))
}

#[interface(name = "org.eduvision.Attendance1")]
impl AttendanceBus {
    /// Start recognition.
    async fn start(&self) -> zbus::fdo::Result<()> {
        tracing::info!("start requested");
        self.with_controller(|c| c.start()).await
    }

    /// Stop recognition and wait for the worker to exit.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.with_controller(|c| c.stop().map(|_| ())).await
    }

    async fn restart(&self) -> zbus::fdo::Result<()> {
        tracing::info!("restart requested");
        self.with_controller(|c| c.restart()).await
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self
            .with_controller(|c| Ok::<_, std::convert::Infallible>(c.status()))
            .await?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "recognition": status,
        })
        .to_string())
    }

    /// Feed entries appended at or after `cursor`, and the cursor to pass next.
    async fn feed(&self, cursor: u64) -> zbus::fdo::Result<(String, u64)> {
        feed_page(&self.feed, cursor)
    }

    /// Register a user. Returns the new user id.
    async fn add_user(
        &self,
        name: &str,
        surname: &str,
        patronymic: &str,
        group: &str,
        photo_path: &str,
    ) -> zbus::fdo::Result<i64> {
        tracing::info!(name, surname, group, "add_user requested");
        let user = self
            .users
            .create(NewUser {
                name: name.to_string(),
                surname: surname.to_string(),
                patronymic: patronymic.to_string(),
                group: group.to_string(),
                photo_path: photo_path.to_string(),
            })
            .map_err(failed)?;
        Ok(user.id)
    }

    /// Remove a user, their attendance and their gallery entries.
    async fn remove_user(&self, user_id: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(user_id, "remove_user requested");
        let removed = self.users.remove(user_id).map_err(failed)?;
        self.with_controller(move |c| c.remove_user_from_gallery(user_id))
            .await?;
        Ok(removed)
    }

    /// Enroll `user_id` from their photo directory.
    async fn enroll(&self, user_id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(user_id, "enroll requested");
        if self.users.find_by_id(user_id).map_err(failed)?.is_none() {
            return Err(zbus::fdo::Error::InvalidArgs(format!("no user with id {user_id}")));
        }
        let enroller = Arc::clone(&self.enroller);
        let report = self.with_controller(move |c| c.enroll(&enroller, user_id)).await?;
        to_json(&report)
    }

    /// Rebuild the gallery from every registered user's photos.
    async fn rebuild_gallery(&self) -> zbus::fdo::Result<String> {
        tracing::info!("rebuild_gallery requested");
        let ids: Vec<UserId> = self.users.all_ids().map_err(failed)?;
        let enroller = Arc::clone(&self.enroller);
        let reports = self
            .with_controller(move |c| c.rebuild_gallery(&enroller, &ids))
            .await?;
        to_json(&reports)
    }

    async fn group_attendance(&self, group: &str) -> zbus::fdo::Result<String> {
        let report = self
            .users
            .group_attendance(group, &chrono::Local)
            .map_err(failed)?;
        to_json(&report)
    }

    async fn student_attendance(&self, name: &str, surname: &str) -> zbus::fdo::Result<String> {
        match self
            .users
            .student_attendance(name, surname, &chrono::Local)
            .map_err(failed)?
        {
            Some(report) => to_json(&report),
            None => Err(zbus::fdo::Error::InvalidArgs(format!("no student {name} {surname}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eduvision_core::detector::{DetectorError, FaceDetector};
    use eduvision_core::encoder::{EncoderError, FaceEncoder};
    use eduvision_core::{
        Embedding, FaceModels, FaceRegion, FeedEntry, FeedKind, Frame, FrameMailbox, Gallery, GalleryStore,
        WorkerConfig,
    };

    struct NoFaces;

    impl FaceDetector for NoFaces {
        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
            Ok(Vec::new())
        }
    }

    impl FaceEncoder for NoFaces {
        fn embed(&self, _frame: &Frame, _face: &FaceRegion) -> Result<Embedding, EncoderError> {
            Err(EncoderError::EmptyCrop)
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    fn bus(dir: &std::path::Path) -> (AttendanceBus, Arc<Mutex<AttendanceController>>) {
        let models = FaceModels::new(Arc::new(NoFaces), Arc::new(NoFaces));
        let users = Arc::new(UserRepository::open_in_memory().unwrap());
        let controller = Arc::new(Mutex::new(AttendanceController::new(
            Arc::new(FrameMailbox::new()),
            models.clone(),
            Gallery::new(),
            GalleryStore::new(dir.join("gallery.json")),
            users.clone(),
            users.clone(),
            WorkerConfig::default(),
        )));
        let enroller = Arc::new(Enroller::new(models, dir.join("photos")));
        (AttendanceBus::new(Arc::clone(&controller), users, enroller), controller)
    }

    #[test]
    fn test_feed_is_readable_while_controller_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, controller) = bus(dir.path());
        let feed = lock(&controller).feed();

        // Simulates a long enrollment holding the controller.
        let _busy = lock(&controller);
        feed.append(FeedEntry {
            user_id: 4,
            label: "Ivan Petrov IVT-21".into(),
            kind: FeedKind::Recognized,
            at: chrono::Utc::now(),
        });

        let (json, next) = feed_page(&bus.feed, 0).unwrap();
        assert_eq!(next, 1);
        let entries: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(entries[0]["text"], "Ivan Petrov IVT-21 was recognized");
        assert_eq!(entries[0]["kind"], "recognized");

        let (empty, same) = feed_page(&bus.feed, next).unwrap();
        assert_eq!(empty, "[]");
        assert_eq!(same, 1);
    }
}
