/// SQLite-backed record store
///
/// Each record is stored as a JSON body next to the columns needed for
/// integrity (primary key, unique certificate id, session foreign key).
/// Filtering and sorting operate on the deserialized records so both store
/// implementations share the same query semantics.
use super::{
    completion_patch, new_record_id, Query, RecordKind, RecordStore, SortSpec, StoreError,
    StoreResult,
};
use crate::{Certificate, NewCertificate, NewWipeSession, SessionPatch, WipeSession};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const IN_MEMORY: &str = ":memory:";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl SqliteStore {
    /// Create or open the database at `path`, creating parent directories
    /// and schema as needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();

        if db_path.to_str() != Some(IN_MEMORY) {
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create record database directory")?;
                }
            }
        }

        let conn = Connection::open(&db_path).context("Failed to open record database")?;

        if db_path.to_str() != Some(IN_MEMORY) {
            // WAL for crash resilience
            let mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .context("Failed to set WAL mode")?;
            tracing::debug!(journal_mode = %mode, "Journal mode set");
            conn.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;
        }

        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        store.init_schema()?;

        tracing::debug!(path = %store.db_path.display(), "Opened record database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(IN_MEMORY)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock().context("Failed to lock record database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS wipe_sessions (
                id TEXT PRIMARY KEY,
                created_date TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS certificates (
                id TEXT PRIMARY KEY,
                certificate_id TEXT NOT NULL UNIQUE,
                session_id TEXT NOT NULL REFERENCES wipe_sessions(id),
                created_date TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_certificates_session
                ON certificates(session_id);",
        )
        .context("Failed to create record schema")?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn load_all<T: DeserializeOwned>(&self, sql: &str) -> StoreResult<Vec<T>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }
}

fn load_session(tx: &Transaction<'_>, id: &str) -> StoreResult<WipeSession> {
    let body: Option<String> = tx
        .query_row(
            "SELECT body FROM wipe_sessions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match body {
        Some(body) => Ok(serde_json::from_str(&body)?),
        None => Err(StoreError::NotFound {
            kind: RecordKind::Session,
            id: id.to_string(),
        }),
    }
}

fn store_session(tx: &Transaction<'_>, session: &WipeSession) -> StoreResult<()> {
    tx.execute(
        "UPDATE wipe_sessions SET body = ?1 WHERE id = ?2",
        params![serde_json::to_string(session)?, session.id],
    )?;
    Ok(())
}

fn insert_certificate(tx: &Transaction<'_>, record: &Certificate) -> StoreResult<()> {
    tx.execute(
        "INSERT INTO certificates (id, certificate_id, session_id, created_date, body)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id,
            record.certificate_id,
            record.session_id,
            record.created_date.to_rfc3339(),
            serde_json::to_string(record)?,
        ],
    )
    .map_err(|e| {
        constraint_to_conflict(
            e,
            RecordKind::Certificate,
            format!("certificate_id {} already exists", record.certificate_id),
        )
    })?;
    Ok(())
}

/// Map unique-constraint failures to a domain conflict
fn constraint_to_conflict(err: rusqlite::Error, kind: RecordKind, detail: String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict { kind, detail }
        }
        _ => StoreError::Database(err),
    }
}

impl RecordStore for SqliteStore {
    fn list_sessions(&self, sort: &SortSpec) -> StoreResult<Vec<WipeSession>> {
        let mut sessions: Vec<WipeSession> =
            self.load_all("SELECT body FROM wipe_sessions ORDER BY rowid")?;
        sort.apply(&mut sessions)?;
        Ok(sessions)
    }

    fn filter_sessions(&self, query: &Query) -> StoreResult<Vec<WipeSession>> {
        let sessions: Vec<WipeSession> =
            self.load_all("SELECT body FROM wipe_sessions ORDER BY rowid")?;
        query.apply(sessions)
    }

    fn create_session(&self, session: NewWipeSession) -> StoreResult<WipeSession> {
        let record = session.into_record(new_record_id(RecordKind::Session), Utc::now());
        let body = serde_json::to_string(&record)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO wipe_sessions (id, created_date, body) VALUES (?1, ?2, ?3)",
            params![record.id, record.created_date.to_rfc3339(), body],
        )
        .map_err(|e| {
            constraint_to_conflict(e, RecordKind::Session, format!("id {} exists", record.id))
        })?;

        Ok(record)
    }

    fn update_session(&self, id: &str, patch: SessionPatch) -> StoreResult<WipeSession> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut session = load_session(&tx, id)?;
        patch.apply(&mut session);
        store_session(&tx, &session)?;
        tx.commit()?;

        Ok(session)
    }

    fn list_certificates(&self, sort: &SortSpec) -> StoreResult<Vec<Certificate>> {
        let mut certificates: Vec<Certificate> =
            self.load_all("SELECT body FROM certificates ORDER BY rowid")?;
        sort.apply(&mut certificates)?;
        Ok(certificates)
    }

    fn filter_certificates(&self, query: &Query) -> StoreResult<Vec<Certificate>> {
        let certificates: Vec<Certificate> =
            self.load_all("SELECT body FROM certificates ORDER BY rowid")?;
        query.apply(certificates)
    }

    fn create_certificate(&self, certificate: NewCertificate) -> StoreResult<Certificate> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        load_session(&tx, &certificate.session_id)?;
        let record = certificate.into_record(new_record_id(RecordKind::Certificate), Utc::now());
        insert_certificate(&tx, &record)?;
        tx.commit()?;

        Ok(record)
    }

    fn complete_session(
        &self,
        certificate: NewCertificate,
        completion: SessionPatch,
    ) -> StoreResult<(WipeSession, Certificate)> {
        let mut conn = self.lock()?;
        // Rolled back on drop unless committed
        let tx = conn.transaction()?;

        let mut session = load_session(&tx, &certificate.session_id)?;
        let record = certificate.into_record(new_record_id(RecordKind::Certificate), Utc::now());
        insert_certificate(&tx, &record)?;

        completion_patch(completion, &record.certificate_id).apply(&mut session);
        store_session(&tx, &session)?;
        tx.commit()?;

        Ok((session, record))
    }
}
