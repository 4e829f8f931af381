use super::extract::{
    extraction_schema, DocumentExtractor, DocumentRef, ExtractedCertificate, ExtractionStatus,
};
use crate::crypto::{verification_hash_matches, SigningKey};
use crate::store::RecordStore;
use crate::{Certificate, Operation, SessionStatus, WipeSession, WorkflowError, WorkflowResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Deadline for one extraction call unless configured otherwise
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(60);

pub const MSG_VERIFIED: &str = "Certificate verified successfully";
pub const MSG_VERIFIED_FROM_DOCUMENT: &str = "Certificate verified from uploaded document";
pub const MSG_NOT_FOUND: &str = "Certificate not found";
pub const MSG_NOT_EXTRACTED: &str =
    "Could not extract certificate information from the uploaded file";
pub const MSG_NOT_IN_DATABASE: &str =
    "Certificate ID found in document but not verified in our database";
pub const MSG_HASH_MISMATCH: &str =
    "Certificate verification hash does not match its contents";
pub const MSG_SESSION_NOT_COMPLETED: &str = "Certificate's wipe session did not complete";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub message: String,
    pub certificate: Option<Certificate>,
    /// Absent when the certificate references a session that no longer exists
    pub session: Option<WipeSession>,
    pub extracted: Option<ExtractedCertificate>,
    /// Keyed hash check; `None` when no signing key is configured
    pub hash_verified: Option<bool>,
    /// SHA-256 of the uploaded document bytes
    pub document_sha256: Option<String>,
}

impl VerificationOutcome {
    fn rejected(message: &str) -> Self {
        Self {
            valid: false,
            message: message.to_string(),
            certificate: None,
            session: None,
            extracted: None,
            hash_verified: None,
            document_sha256: None,
        }
    }
}

/// Read-only certificate verification against the record store
pub struct VerificationEngine {
    store: Arc<dyn RecordStore>,
    extractor: Arc<dyn DocumentExtractor>,
    key: Option<Arc<SigningKey>>,
    extraction_timeout: Duration,
}

impl VerificationEngine {
    pub fn new(store: Arc<dyn RecordStore>, extractor: Arc<dyn DocumentExtractor>) -> Self {
        Self {
            store,
            extractor,
            key: None,
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
        }
    }

    /// Also re-check each certificate's keyed verification hash
    pub fn with_signing_key(mut self, key: Arc<SigningKey>) -> Self {
        self.key = Some(key);
        self
    }

    /// Give up on an extraction that has not answered within `timeout`
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn verify_by_id(&self, certificate_id: &str) -> WorkflowResult<VerificationOutcome> {
        let certificate_id = certificate_id.trim();
        if certificate_id.is_empty() {
            return Err(WorkflowError::MissingField("certificate_id"));
        }

        let Some(certificate) = self.store.find_certificate(certificate_id)? else {
            tracing::info!(certificate_id, "Certificate not found");
            return Ok(VerificationOutcome::rejected(MSG_NOT_FOUND));
        };

        let session = self.store.find_session(&certificate.session_id)?;
        if session.is_none() {
            tracing::warn!(
                certificate_id,
                session_id = %certificate.session_id,
                "Certificate references a missing session"
            );
        }

        let hash_verified = self
            .key
            .as_deref()
            .map(|key| verification_hash_matches(key, &certificate));

        let session_status = session.as_ref().map(|s| s.status);
        let (valid, message) = match (hash_verified, session_status) {
            (Some(false), _) => {
                tracing::warn!(certificate_id, "Verification hash mismatch");
                (false, MSG_HASH_MISMATCH)
            }
            (_, Some(status)) if status != SessionStatus::Completed => {
                tracing::warn!(certificate_id, %status, "Certificate session is not completed");
                (false, MSG_SESSION_NOT_COMPLETED)
            }
            _ => (true, MSG_VERIFIED),
        };

        Ok(VerificationOutcome {
            valid,
            message: message.to_string(),
            certificate: Some(certificate),
            session,
            extracted: None,
            hash_verified,
            document_sha256: None,
        })
    }

    pub async fn verify_document(
        &self,
        document: &DocumentRef,
    ) -> WorkflowResult<VerificationOutcome> {
        let document_sha256 = fingerprint(&document.path).await;

        let schema = extraction_schema();
        let extraction = self.extractor.extract(document, &schema);
        let result = match tokio::time::timeout(self.extraction_timeout, extraction).await {
            Ok(result) => result.map_err(|source| WorkflowError::Capability {
                operation: Operation::Extraction,
                source,
            })?,
            Err(_) => {
                tracing::warn!(
                    path = %document.path.display(),
                    timeout = ?self.extraction_timeout,
                    "Document extraction timed out"
                );
                return Err(WorkflowError::Stalled {
                    operation: Operation::Extraction,
                    after: self.extraction_timeout,
                });
            }
        };

        let extracted = match result.status {
            ExtractionStatus::Success => result.output,
            ExtractionStatus::Failure => None,
        };

        let Some(certificate_id) = extracted
            .as_ref()
            .and_then(|e| e.certificate_id())
            .map(String::from)
        else {
            tracing::info!(path = %document.path.display(), "No certificate id in document");
            return Ok(VerificationOutcome {
                extracted,
                document_sha256,
                ..VerificationOutcome::rejected(MSG_NOT_EXTRACTED)
            });
        };

        let mut outcome = self.verify_by_id(&certificate_id)?;
        if outcome.certificate.is_none() {
            outcome.message = MSG_NOT_IN_DATABASE.to_string();
        } else if outcome.valid {
            outcome.message = MSG_VERIFIED_FROM_DOCUMENT.to_string();
        }
        outcome.extracted = extracted;
        outcome.document_sha256 = document_sha256;
        Ok(outcome)
    }
}

async fn fingerprint(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Could not fingerprint document");
            None
        }
    }
}
