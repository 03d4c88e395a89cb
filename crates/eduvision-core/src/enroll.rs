//! Enrollment: turn a user's photo directory into gallery entries.
//!
//! Photos live under `<photo_dir>/<user_id>/`. A photo contributes an
//! embedding only when exactly one face is found in it; anything else is
//! skipped and counted in the report.

use crate::frame::Frame;
use crate::gallery::{Gallery, GalleryError};
use crate::models::FaceModels;
use crate::types::{Embedding, GalleryEntry, UserId};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PHOTO_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot read photo directory {path}: {source}")]
    PhotoDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}

/// Per-user enrollment tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrollReport {
    pub user_id: UserId,
    pub scanned: usize,
    pub accepted: usize,
    pub no_face: usize,
    pub multiple_faces: usize,
    pub unreadable: usize,
    pub failed: usize,
}

enum PhotoOutcome {
    Accepted(Embedding),
    NoFace,
    MultipleFaces(usize),
    Unreadable,
    Failed,
}

pub struct Enroller {
    models: FaceModels,
    photo_dir: PathBuf,
}

impl Enroller {
    pub fn new(models: FaceModels, photo_dir: impl Into<PathBuf>) -> Self {
        Self {
            models,
            photo_dir: photo_dir.into(),
        }
    }

    pub fn user_photo_dir(&self, user_id: UserId) -> PathBuf {
        self.photo_dir.join(user_id.to_string())
    }

    /// Embed every usable photo of `user_id`, in file-name order.
    pub fn embed_user(&self, user_id: UserId) -> Result<(Vec<Embedding>, EnrollReport), EnrollError> {
        let dir = self.user_photo_dir(user_id);
        let photos = list_photos(&dir)?;

        let mut report = EnrollReport {
            user_id,
            scanned: photos.len(),
            ..EnrollReport::default()
        };
        let mut embeddings = Vec::new();

        for path in &photos {
            match self.embed_photo(path) {
                PhotoOutcome::Accepted(e) => {
                    report.accepted += 1;
                    embeddings.push(e);
                }
                PhotoOutcome::NoFace => {
                    tracing::debug!(path = %path.display(), "no face in photo, skipping");
                    report.no_face += 1;
                }
                PhotoOutcome::MultipleFaces(n) => {
                    tracing::debug!(path = %path.display(), faces = n, "several faces in photo, skipping");
                    report.multiple_faces += 1;
                }
                PhotoOutcome::Unreadable => report.unreadable += 1,
                PhotoOutcome::Failed => report.failed += 1,
            }
        }

        Ok((embeddings, report))
    }

    /// Append `user_id`'s embeddings to `gallery`.
    pub fn enroll(&self, gallery: &mut Gallery, user_id: UserId) -> Result<EnrollReport, EnrollError> {
        let (embeddings, report) = self.embed_user(user_id)?;
        gallery.extend(
            embeddings
                .into_iter()
                .map(|embedding| GalleryEntry { user_id, embedding })
                .collect(),
        )?;
        tracing::info!(
            user_id,
            scanned = report.scanned,
            accepted = report.accepted,
            gallery_entries = gallery.len(),
            "user enrolled"
        );
        Ok(report)
    }

    /// Build a fresh gallery from scratch for `user_ids`. Users without a
    /// photo directory are reported with nothing scanned.
    pub fn rebuild(&self, user_ids: &[UserId]) -> Result<(Gallery, Vec<EnrollReport>), EnrollError> {
        let mut gallery = Gallery::new();
        let mut reports = Vec::with_capacity(user_ids.len());

        for &user_id in user_ids {
            match self.enroll(&mut gallery, user_id) {
                Ok(report) => reports.push(report),
                Err(EnrollError::PhotoDir { path, source }) => {
                    tracing::warn!(user_id, path = %path.display(), error = %source, "no photos for user");
                    reports.push(EnrollReport {
                        user_id,
                        ..EnrollReport::default()
                    });
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(users = user_ids.len(), entries = gallery.len(), "gallery rebuilt");
        Ok((gallery, reports))
    }

    fn embed_photo(&self, path: &Path) -> PhotoOutcome {
        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot decode photo");
                return PhotoOutcome::Unreadable;
            }
        };
        let frame = Frame::from_image(&img, 0);

        let faces = match self.models.detector.detect(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "face detection failed");
                return PhotoOutcome::Failed;
            }
        };

        match faces.as_slice() {
            [] => PhotoOutcome::NoFace,
            [face] => match self.models.encoder.embed(&frame, face) {
                Ok(e) => PhotoOutcome::Accepted(e),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "face embedding failed");
                    PhotoOutcome::Failed
                }
            },
            many => PhotoOutcome::MultipleFaces(many.len()),
        }
    }
}

fn list_photos(dir: &Path) -> Result<Vec<PathBuf>, EnrollError> {
    let read = fs::read_dir(dir).map_err(|source| EnrollError::PhotoDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut photos: Vec<PathBuf> = read
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| PHOTO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    photos.sort();
    Ok(photos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectorError, FaceDetector};
    use crate::testing::BrightnessEncoder;
    use crate::types::FaceRegion;
    use std::sync::Arc;

    /// Face count encoded in the top-left pixel: 0-99 none, 100-199 one, 200+ two.
    struct PixelCountDetector;

    impl FaceDetector for PixelCountDetector {
        fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectorError> {
            let n = frame.data.first().copied().unwrap_or(0) / 100;
            let face = FaceRegion {
                x: 0.0,
                y: 0.0,
                width: frame.width as f32,
                height: frame.height as f32,
                confidence: 0.9,
            };
            Ok(vec![face; n as usize])
        }
    }

    fn enroller(root: &Path) -> Enroller {
        let models = FaceModels::new(Arc::new(PixelCountDetector), Arc::new(BrightnessEncoder));
        Enroller::new(models, root)
    }

    fn write_photo(dir: &Path, name: &str, value: u8) {
        fs::create_dir_all(dir).unwrap();
        image::GrayImage::from_pixel(4, 4, image::Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_embed_user_skips_zero_and_multi_face_photos() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("7");
        write_photo(&dir, "a.png", 150);
        write_photo(&dir, "b.png", 50);
        write_photo(&dir, "c.png", 250);
        write_photo(&dir, "d.PNG", 120);
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        fs::write(dir.join("broken.jpg"), "not an image").unwrap();

        let (embeddings, report) = enroller(root.path()).embed_user(7).unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(
            report,
            EnrollReport {
                user_id: 7,
                scanned: 5,
                accepted: 2,
                no_face: 1,
                multiple_faces: 1,
                unreadable: 1,
                failed: 0,
            }
        );
    }

    #[test]
    fn test_enroll_appends_after_existing_entries() {
        let root = tempfile::tempdir().unwrap();
        write_photo(&root.path().join("3"), "1.png", 110);

        let mut gallery = Gallery::new();
        gallery.push(1, Embedding::new(vec![0.0])).unwrap();

        let report = enroller(root.path()).enroll(&mut gallery, 3).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.entries()[0].user_id, 1);
        assert_eq!(gallery.entries()[1].user_id, 3);
    }

    #[test]
    fn test_enroll_missing_directory_is_error() {
        let root = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::new();
        let err = enroller(root.path()).enroll(&mut gallery, 99).unwrap_err();
        assert!(matches!(err, EnrollError::PhotoDir { .. }));
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_rebuild_replaces_everything() {
        let root = tempfile::tempdir().unwrap();
        write_photo(&root.path().join("1"), "a.png", 110);
        write_photo(&root.path().join("2"), "a.png", 130);
        write_photo(&root.path().join("2"), "b.png", 140);

        let (gallery, reports) = enroller(root.path()).rebuild(&[1, 2, 5]).unwrap();
        assert_eq!(gallery.len(), 3);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].scanned, 0);
        assert_eq!(
            gallery.entries().iter().map(|e| e.user_id).collect::<Vec<_>>(),
            vec![1, 2, 2]
        );
    }
}
