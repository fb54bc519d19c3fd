//! Filesystem blob store for captured round images.

use crate::{validate_session_id, StoreError};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// Images stored as `<root>/<session>/<uuid>.<ext>`. Callers hold the
/// relative part (`<session>/<uuid>.<ext>`) as the reference.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a new image for `session_id` and return its reference.
    pub fn put(&self, session_id: &str, bytes: &[u8], extension: &str) -> Result<String, StoreError> {
        validate_session_id(session_id)?;
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StoreError::InvalidReference(format!("extension {extension:?}")));
        }

        let dir = self.root.join(session_id);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let reference = format!("{session_id}/{}.{}", Uuid::new_v4(), extension.to_ascii_lowercase());
        let path = self.root.join(&reference);
        std::fs::write(&path, bytes).map_err(io_err(&path))?;

        tracing::debug!(reference = %reference, bytes = bytes.len(), "stored image");
        Ok(reference)
    }

    pub fn read(&self, reference: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.resolve(reference)?;
        std::fs::read(&path).map_err(io_err(&path))
    }

    /// Remove one image. A missing file is not an error.
    pub fn delete(&self, reference: &str) -> Result<(), StoreError> {
        let path = self.resolve(reference)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Remove every image of a session.
    pub fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        validate_session_id(session_id)?;
        let dir = self.root.join(session_id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&dir)(e)),
        }
    }

    /// Absolute path for a reference. Only plain relative paths below the
    /// root are accepted.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(reference);
        let plain = !reference.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(StoreError::InvalidReference(reference.to_string()));
        }
        Ok(self.root.join(rel))
    }
}
