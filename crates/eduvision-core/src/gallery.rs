//! In-memory gallery of enrolled embeddings and its single-file store.
//!
//! The store is load-all / replace-all: the whole gallery is read at
//! startup and rewritten (temp file + rename) after every enrollment.

use crate::types::{Embedding, GalleryEntry, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const GALLERY_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery file not found: {0}")]
    NotFound(PathBuf),
    #[error("gallery I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt gallery file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("embedding dimension mismatch: gallery has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Ordered sequence of (identity, embedding) pairs. All embeddings share one dimension.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let mut gallery = Self::new();
        gallery.extend(entries)?;
        Ok(gallery)
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding dimension, or `None` while the gallery is empty.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.dimension())
    }

    pub fn push(&mut self, user_id: UserId, embedding: Embedding) -> Result<(), GalleryError> {
        if let Some(expected) = self.dimension() {
            if embedding.dimension() != expected {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: embedding.dimension(),
                });
            }
        }
        self.entries.push(GalleryEntry { user_id, embedding });
        Ok(())
    }

    /// Append entries in order. Nothing is appended if any entry has the wrong dimension.
    pub fn extend(&mut self, entries: Vec<GalleryEntry>) -> Result<(), GalleryError> {
        let expected = self
            .dimension()
            .or_else(|| entries.first().map(|e| e.embedding.dimension()));
        if let Some(expected) = expected {
            if let Some(bad) = entries.iter().find(|e| e.embedding.dimension() != expected) {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: bad.embedding.dimension(),
                });
            }
        }
        self.entries.extend(entries);
        Ok(())
    }

    /// Drop every entry for `user_id`, returning how many were removed.
    pub fn remove_user(&mut self, user_id: UserId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.user_id != user_id);
        before - self.entries.len()
    }

    /// Fail unless the gallery is empty or holds `expected`-dimension embeddings.
    pub fn ensure_dimension(&self, expected: usize) -> Result<(), GalleryError> {
        match self.dimension() {
            Some(actual) if actual != expected => Err(GalleryError::DimensionMismatch { expected, actual }),
            _ => Ok(()),
        }
    }

    pub fn user_ids(&self) -> BTreeSet<UserId> {
        self.entries.iter().map(|e| e.user_id).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct GalleryFile {
    version: u32,
    entries: Vec<GalleryEntry>,
}

/// File-backed gallery persistence.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the whole gallery. A missing or malformed file is an error;
    /// callers treat it as fatal at startup.
    pub fn load(&self) -> Result<Gallery, GalleryError> {
        if !self.path.exists() {
            return Err(GalleryError::NotFound(self.path.clone()));
        }
        let bytes = fs::read(&self.path).map_err(|source| GalleryError::Io {
            path: self.path.clone(),
            source,
        })?;
        let file: GalleryFile =
            serde_json::from_slice(&bytes).map_err(|e| GalleryError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if file.version != GALLERY_FORMAT_VERSION {
            return Err(GalleryError::Corrupt {
                path: self.path.clone(),
                reason: format!("unsupported format version {}", file.version),
            });
        }

        let gallery = Gallery::from_entries(file.entries).map_err(|e| GalleryError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            path = %self.path.display(),
            entries = gallery.len(),
            users = gallery.user_ids().len(),
            dimension = ?gallery.dimension(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Replace the gallery file with `gallery`.
    pub fn save(&self, gallery: &Gallery) -> Result<(), GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = GalleryFile {
            version: GALLERY_FORMAT_VERSION,
            entries: gallery.entries.clone(),
        };
        let json = serde_json::to_vec(&file).map_err(|e| GalleryError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp).map_err(io_err)?;
            f.write_all(&json).map_err(io_err)?;
            f.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        tracing::info!(path = %self.path.display(), entries = gallery.len(), "gallery saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_push_rejects_dimension_mismatch() {
        let mut g = Gallery::new();
        g.push(1, emb(&[0.0, 1.0])).unwrap();
        let err = g.push(2, emb(&[0.0, 1.0, 2.0])).unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_extend_is_all_or_nothing() {
        let mut g = Gallery::new();
        let entries = vec![
            GalleryEntry {
                user_id: 1,
                embedding: emb(&[0.0]),
            },
            GalleryEntry {
                user_id: 2,
                embedding: emb(&[0.0, 1.0]),
            },
        ];
        assert!(g.extend(entries).is_err());
        assert!(g.is_empty());
    }

    #[test]
    fn test_ensure_dimension() {
        assert!(Gallery::new().ensure_dimension(128).is_ok());

        let mut g = Gallery::new();
        g.push(1, emb(&[0.1, 5.0])).unwrap();
        assert!(g.ensure_dimension(2).is_ok());
        assert!(matches!(
            g.ensure_dimension(128),
            Err(GalleryError::DimensionMismatch {
                expected: 128,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_remove_user() {
        let mut g = Gallery::new();
        g.push(1, emb(&[0.0])).unwrap();
        g.push(2, emb(&[1.0])).unwrap();
        g.push(1, emb(&[2.0])).unwrap();
        assert_eq!(g.remove_user(1), 2);
        assert_eq!(g.user_ids().into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_save_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("nested/gallery.json"));

        let mut g = Gallery::new();
        g.push(3, emb(&[0.1, 0.2])).unwrap();
        g.push(1, emb(&[0.3, 0.4])).unwrap();
        g.push(3, emb(&[0.5, 0.6])).unwrap();
        store.save(&g).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, g);
        assert!(!dir.path().join("nested/gallery.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.load(), Err(GalleryError::NotFound(_))));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(&path, b"{not json").unwrap();
        let store = GalleryStore::new(&path);
        assert!(matches!(store.load(), Err(GalleryError::Corrupt { .. })));
    }

    #[test]
    fn test_load_rejects_mixed_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(
            &path,
            r#"{"version":1,"entries":[
                {"user_id":1,"embedding":{"values":[0.0,1.0]}},
                {"user_id":2,"embedding":{"values":[0.0]}}
            ]}"#,
        )
        .unwrap();
        let store = GalleryStore::new(&path);
        assert!(matches!(store.load(), Err(GalleryError::Corrupt { .. })));
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(&path, r#"{"version":99,"entries":[]}"#).unwrap();
        assert!(matches!(
            GalleryStore::new(&path).load(),
            Err(GalleryError::Corrupt { .. })
        ));
    }
}
