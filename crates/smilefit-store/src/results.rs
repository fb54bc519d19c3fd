//! Per-session round results.

use crate::record::RoundRecord;
use crate::{validate_session_id, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Append-only result log, partitioned by session.
pub trait ResultStore: Send + Sync {
    fn append(&self, record: RoundRecord) -> Result<(), StoreError>;

    /// Records of a session ordered by round, then by creation time. An
    /// unknown session yields an empty list.
    fn list(&self, session_id: &str) -> Result<Vec<RoundRecord>, StoreError>;

    /// Remove a session and return the records it held.
    fn delete_session(&self, session_id: &str) -> Result<Vec<RoundRecord>, StoreError>;

    fn sessions(&self) -> Result<Vec<String>, StoreError>;
}

pub(crate) fn sort_rounds(records: &mut [RoundRecord]) {
    records.sort_by(|a, b| a.round.cmp(&b.round).then(a.created_at.cmp(&b.created_at)));
}

/// Ephemeral store for sessions that end with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, Vec<RoundRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryStore {
    fn append(&self, record: RoundRecord) -> Result<(), StoreError> {
        validate_session_id(&record.session_id)?;
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        sessions
            .entry(record.session_id.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    fn list(&self, session_id: &str) -> Result<Vec<RoundRecord>, StoreError> {
        let sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        let mut records = sessions.get(session_id).cloned().unwrap_or_default();
        sort_rounds(&mut records);
        Ok(records)
    }

    fn delete_session(&self, session_id: &str) -> Result<Vec<RoundRecord>, StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(sessions.remove(session_id).unwrap_or_default())
    }

    fn sessions(&self) -> Result<Vec<String>, StoreError> {
        let sessions = self.sessions.lock().map_err(|_| StoreError::Poisoned)?;
        let mut ids: Vec<String> = sessions.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
