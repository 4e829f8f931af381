use super::{
    completion_patch, new_record_id, Query, RecordKind, RecordStore, SortSpec, StoreError,
    StoreResult,
};
use crate::{Certificate, NewCertificate, NewWipeSession, SessionPatch, WipeSession};
use chrono::Utc;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    sessions: Vec<WipeSession>,
    certificates: Vec<Certificate>,
}

/// Volatile record store kept entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing records, bypassing the create-time
    /// integrity checks. Useful for reproducing stores that were written by
    /// older builds or edited by hand.
    pub fn with_records(sessions: Vec<WipeSession>, certificates: Vec<Certificate>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                sessions,
                certificates,
            }),
        }
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Tables {
    fn session_index(&self, id: &str) -> StoreResult<usize> {
        self.sessions
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: RecordKind::Session,
                id: id.to_string(),
            })
    }

    /// Checks shared by both certificate writes. Nothing is modified.
    fn admit_certificate(&self, certificate: &NewCertificate) -> StoreResult<usize> {
        let index = self.session_index(&certificate.session_id)?;

        if self
            .certificates
            .iter()
            .any(|c| c.certificate_id == certificate.certificate_id)
        {
            return Err(StoreError::Conflict {
                kind: RecordKind::Certificate,
                detail: format!("certificate_id {} already exists", certificate.certificate_id),
            });
        }
        Ok(index)
    }
}

impl RecordStore for InMemoryStore {
    fn list_sessions(&self, sort: &SortSpec) -> StoreResult<Vec<WipeSession>> {
        let mut sessions = self.read()?.sessions.clone();
        sort.apply(&mut sessions)?;
        Ok(sessions)
    }

    fn filter_sessions(&self, query: &Query) -> StoreResult<Vec<WipeSession>> {
        let tables = self.read()?;
        query.apply(tables.sessions.iter().cloned())
    }

    fn create_session(&self, session: NewWipeSession) -> StoreResult<WipeSession> {
        let record = session.into_record(new_record_id(RecordKind::Session), Utc::now());
        self.write()?.sessions.push(record.clone());
        Ok(record)
    }

    fn update_session(&self, id: &str, patch: SessionPatch) -> StoreResult<WipeSession> {
        let mut tables = self.write()?;
        let index = tables.session_index(id)?;
        let session = &mut tables.sessions[index];

        patch.apply(session);
        Ok(session.clone())
    }

    fn list_certificates(&self, sort: &SortSpec) -> StoreResult<Vec<Certificate>> {
        let mut certificates = self.read()?.certificates.clone();
        sort.apply(&mut certificates)?;
        Ok(certificates)
    }

    fn filter_certificates(&self, query: &Query) -> StoreResult<Vec<Certificate>> {
        let tables = self.read()?;
        query.apply(tables.certificates.iter().cloned())
    }

    fn create_certificate(&self, certificate: NewCertificate) -> StoreResult<Certificate> {
        let mut tables = self.write()?;
        tables.admit_certificate(&certificate)?;

        let record = certificate.into_record(new_record_id(RecordKind::Certificate), Utc::now());
        tables.certificates.push(record.clone());
        Ok(record)
    }

    fn complete_session(
        &self,
        certificate: NewCertificate,
        completion: SessionPatch,
    ) -> StoreResult<(WipeSession, Certificate)> {
        let mut tables = self.write()?;
        let index = tables.admit_certificate(&certificate)?;

        let record = certificate.into_record(new_record_id(RecordKind::Certificate), Utc::now());
        let session = &mut tables.sessions[index];
        completion_patch(completion, &record.certificate_id).apply(session);
        let session = session.clone();

        tables.certificates.push(record.clone());
        Ok((session, record))
    }
}
