//! smilefit-store: round results, teacher references and captured images.
//!
//! Results are kept per session behind the [`ResultStore`] trait, with an
//! in-memory backend for ephemeral sessions and a SQLite backend for
//! persistence. Captured images live on the filesystem and records refer to
//! them by relative path.

pub mod images;
pub mod record;
pub mod results;
pub mod sqlite;
pub mod teachers;

pub use images::ImageStore;
pub use record::{RoundRecord, TeacherReference};
pub use results::{MemoryStore, ResultStore};
pub use sqlite::SqliteStore;
pub use teachers::TeacherDataset;

use std::path::PathBuf;
use thiserror::Error;

/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid session id: {0:?}")]
    InvalidSession(String),
    #[error("invalid image reference: {0:?}")]
    InvalidReference(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Session ids become directory names and SQL keys: ASCII alphanumerics,
/// `-` and `_` only.
pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSession(session_id.to_string()))
    }
}
