//! Record store for wipe sessions and certificates
//!
//! The workflow only ever talks to [`RecordStore`]. Two implementations ship
//! with the crate:
//! - [`InMemoryStore`]: lock-protected vectors, used by tests and demos
//! - [`SqliteStore`]: persistent storage with transactional updates
//!
//! # Atomicity
//!
//! `create_*` and `update_session` are atomic per record. An update reads,
//! patches and writes a session under a single lock (in-memory) or a single
//! transaction (SQLite), so concurrent updates to the same id never lose
//! each other's fields. Certificate ids are unique; creating a duplicate
//! `certificate_id` fails with [`StoreError::Conflict`].
//!
//! [`RecordStore::complete_session`] writes a certificate and marks its
//! session completed as one unit. A certificate issued by the workflow never
//! exists without its completed session.
pub mod memory;
pub mod query;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use query::{Query, SortOrder, SortSpec};
pub use sqlite::SqliteStore;

use crate::{
    Certificate, NewCertificate, NewWipeSession, SessionPatch, SessionStatus, WipeSession,
};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Session,
    Certificate,
}

impl RecordKind {
    fn id_prefix(&self) -> &'static str {
        match self {
            RecordKind::Session => "sess",
            RecordKind::Certificate => "cert",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Session => write!(f, "Wipe session"),
            RecordKind::Certificate => write!(f, "Certificate"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("{kind} conflict: {detail}")]
    Conflict { kind: RecordKind, detail: String },

    #[error("Invalid sort specification: {0}")]
    InvalidSort(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Record store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Patch that completes a session under `certificate_id`
pub(crate) fn completion_patch(
    mut completion: SessionPatch,
    certificate_id: &str,
) -> SessionPatch {
    completion.status = Some(SessionStatus::Completed);
    completion.certificate_id = Some(certificate_id.to_string());
    completion
}

/// Store-assigned record identifier
pub(crate) fn new_record_id(kind: RecordKind) -> String {
    format!("{}-{}", kind.id_prefix(), Uuid::new_v4().simple())
}

pub trait RecordStore: Send + Sync {
    fn list_sessions(&self, sort: &SortSpec) -> StoreResult<Vec<WipeSession>>;

    fn filter_sessions(&self, query: &Query) -> StoreResult<Vec<WipeSession>>;

    /// Persist a new session with a fresh id and `created_date`
    fn create_session(&self, session: NewWipeSession) -> StoreResult<WipeSession>;

    /// Atomically apply `patch` to the session with `id`
    fn update_session(&self, id: &str, patch: SessionPatch) -> StoreResult<WipeSession>;

    fn list_certificates(&self, sort: &SortSpec) -> StoreResult<Vec<Certificate>>;

    fn filter_certificates(&self, query: &Query) -> StoreResult<Vec<Certificate>>;

    /// Persist a certificate. The owning session must exist and the
    /// `certificate_id` must not be taken.
    fn create_certificate(&self, certificate: NewCertificate) -> StoreResult<Certificate>;

    /// Persist `certificate` and complete its session in one step: `completion`
    /// is applied with `status` forced to completed and `certificate_id` set to
    /// the new certificate. On error neither record is changed.
    fn complete_session(
        &self,
        certificate: NewCertificate,
        completion: SessionPatch,
    ) -> StoreResult<(WipeSession, Certificate)>;

    fn find_session(&self, id: &str) -> StoreResult<Option<WipeSession>> {
        Ok(self
            .filter_sessions(&Query::eq("id", id))?
            .into_iter()
            .next())
    }

    fn find_certificate(&self, certificate_id: &str) -> StoreResult<Option<Certificate>> {
        Ok(self
            .filter_certificates(&Query::eq("certificate_id", certificate_id))?
            .into_iter()
            .next())
    }
}
