//! SQLite-backed result store.

use crate::record::RoundRecord;
use crate::results::ResultStore;
use crate::{validate_session_id, StoreError};
use chrono::DateTime;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "SELECT id, session_id, teacher_id, round, score, features, embedding, image, created_us FROM rounds";

/// Results persisted in a single `rounds` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let store = Self::with_connection(conn)?;
        tracing::info!(path = %path.display(), "opened result database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS rounds (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                teacher_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                score REAL NOT NULL,
                features TEXT NOT NULL,
                embedding TEXT,
                image TEXT,
                created_us INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS rounds_session_idx ON rounds(session_id, round, created_us);
            COMMIT;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Columns as stored, before JSON and id decoding.
struct RawRow {
    id: String,
    session_id: String,
    teacher_id: String,
    round: u32,
    score: f64,
    features: String,
    embedding: Option<String>,
    image: Option<String>,
    created_us: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            teacher_id: row.get(2)?,
            round: row.get(3)?,
            score: row.get(4)?,
            features: row.get(5)?,
            embedding: row.get(6)?,
            image: row.get(7)?,
            created_us: row.get(8)?,
        })
    }

    fn decode(self) -> Result<RoundRecord, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(e.to_string()))?;
        let created_at = DateTime::from_timestamp_micros(self.created_us)
            .ok_or_else(|| corrupt(format!("timestamp {} out of range", self.created_us)))?;
        let features = serde_json::from_str(&self.features).map_err(|e| corrupt(e.to_string()))?;
        let embedding = self
            .embedding
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(RoundRecord {
            id,
            session_id: self.session_id,
            teacher_id: self.teacher_id,
            round: self.round,
            score: self.score,
            features,
            embedding,
            image: self.image,
            created_at,
        })
    }
}

fn query_session(conn: &Connection, session_id: &str) -> Result<Vec<RoundRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE session_id = ?1 ORDER BY round ASC, created_us ASC"
    ))?;
    let rows = stmt
        .query_map(params![session_id], RawRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawRow::decode).collect()
}

impl ResultStore for SqliteStore {
    fn append(&self, record: RoundRecord) -> Result<(), StoreError> {
        validate_session_id(&record.session_id)?;
        let features = serde_json::to_string(&record.features)?;
        let embedding = record
            .embedding
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO rounds (id, session_id, teacher_id, round, score, features, embedding, image, created_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id.to_string(),
                record.session_id,
                record.teacher_id,
                record.round,
                record.score,
                features,
                embedding,
                record.image,
                record.created_at.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    fn list(&self, session_id: &str) -> Result<Vec<RoundRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        query_session(&conn, session_id)
    }

    fn delete_session(&self, session_id: &str) -> Result<Vec<RoundRecord>, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let records = query_session(&tx, session_id)?;
        tx.execute("DELETE FROM rounds WHERE session_id = ?1", params![session_id])?;
        tx.commit()?;
        Ok(records)
    }

    fn sessions(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare("SELECT DISTINCT session_id FROM rounds ORDER BY session_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use smilefit_core::{Embedding, FeatureSchema, FeatureVector};

    fn record(session: &str, round: u32) -> RoundRecord {
        RoundRecord::new(session, "olivia", round, 2.5, FeatureVector::zeros(&FeatureSchema::default_au()))
    }

    #[test]
    fn test_append_and_list_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let rec = record("s1", 4)
            .with_embedding(Some(Embedding { values: vec![0.5, -1.0], model_version: Some("ae".into()) }))
            .with_image(Some("s1/a.png".into()));
        store.append(rec.clone()).unwrap();

        let listed = store.list("s1").unwrap();
        assert_eq!(listed.len(), 1);
        let got = &listed[0];
        assert_eq!(got.id, rec.id);
        assert_eq!(got.features, rec.features);
        assert_eq!(got.embedding, rec.embedding);
        assert_eq!(got.image.as_deref(), Some("s1/a.png"));
        assert_eq!(got.created_at.timestamp_micros(), rec.created_at.timestamp_micros());
    }

    #[test]
    fn test_list_orders_by_round_then_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        let late = record("s1", 2);
        let mut early = record("s1", 2);
        early.created_at = late.created_at - Duration::seconds(1);
        store.append(late.clone()).unwrap();
        store.append(record("s1", 1)).unwrap();
        store.append(early.clone()).unwrap();

        let ids: Vec<_> = store.list("s1").unwrap().into_iter().map(|r| (r.round, r.id)).collect();
        assert_eq!(ids[0].0, 1);
        assert_eq!(ids[1], (2, early.id));
        assert_eq!(ids[2], (2, late.id));
    }

    #[test]
    fn test_delete_session_removes_only_that_session() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append(record("s1", 1)).unwrap();
        store.append(record("s1", 2)).unwrap();
        store.append(record("s2", 1)).unwrap();

        let removed = store.delete_session("s1").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.list("s1").unwrap().is_empty());
        assert_eq!(store.sessions().unwrap(), vec!["s2".to_string()]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/results.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append(record("s1", 1)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list("s1").unwrap().len(), 1);
    }
}
