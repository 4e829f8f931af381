use super::secure_rng::{secure_random_bytes, RingSystemRNG};
use crate::store::{RecordKind, RecordStore, StoreError};
use crate::{
    Certificate, NewCertificate, SessionPatch, WipeMethod, WipeSession, WorkflowError,
    WorkflowResult,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use ring::hmac;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Organization recorded when the session did not name one
pub const DEFAULT_ORGANIZATION: &str = "Individual User";

const CERTIFICATE_ID_PREFIX: &str = "CERT";

/// Random bytes in the suffix of a certificate id (two hex digits each)
const CERTIFICATE_ID_RANDOM_BYTES: usize = 5;

/// Attempts at drawing a certificate id that is not already stored
const MAX_ID_ATTEMPTS: usize = 8;

/// Minimum accepted HMAC key length in bytes
pub const MIN_KEY_LEN: usize = 16;

/// HMAC-SHA256 key used to bind verification hashes to their certificates
pub struct SigningKey {
    key: hmac::Key,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(..)")
    }
}

impl SigningKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_KEY_LEN {
            return Err(anyhow!(
                "Signing key must be at least {} bytes, got {}",
                MIN_KEY_LEN,
                bytes.len()
            ));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, bytes),
        })
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded.trim()).context("Signing key is not valid hex")?;
        Self::from_bytes(&bytes)
    }

    /// Fresh random key. Hashes signed with it can only be re-checked by this process.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; 32];
        secure_random_bytes(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Hex-encoded HMAC-SHA256 tag over `payload`
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(hmac::sign(&self.key, payload).as_ref())
    }

    pub fn verify(&self, payload: &[u8], tag_hex: &str) -> bool {
        match hex::decode(tag_hex.trim()) {
            Ok(tag) => hmac::verify(&self.key, payload, &tag).is_ok(),
            Err(_) => false,
        }
    }
}

/// Canonical bytes covered by the verification hash.
///
/// serde_json maps are key-sorted, so the encoding does not depend on
/// field declaration order.
fn signing_payload(
    certificate_id: &str,
    session_id: &str,
    organization: &str,
    target_description: &str,
    wipe_standard: WipeMethod,
    compliance_standards: &[String],
) -> Vec<u8> {
    let mut fields = Map::new();
    fields.insert("certificate_id".into(), Value::from(certificate_id));
    fields.insert("session_id".into(), Value::from(session_id));
    fields.insert("organization".into(), Value::from(organization));
    fields.insert("target_description".into(), Value::from(target_description));
    fields.insert("wipe_standard".into(), Value::from(wipe_standard.as_str()));
    fields.insert(
        "compliance_standards".into(),
        Value::from(compliance_standards.to_vec()),
    );
    Value::Object(fields).to_string().into_bytes()
}

/// Re-derive the verification hash of a stored certificate and compare
pub fn verification_hash_matches(key: &SigningKey, certificate: &Certificate) -> bool {
    let payload = signing_payload(
        &certificate.certificate_id,
        &certificate.session_id,
        &certificate.organization,
        &certificate.target_description,
        certificate.wipe_standard,
        &certificate.compliance_standards,
    );
    key.verify(&payload, &certificate.verification_hash)
}

/// `CERT-YYYYMMDD-XXXXXXXXXX`
pub fn format_certificate_id(issued: DateTime<Utc>, suffix: &str) -> String {
    format!(
        "{}-{}-{}",
        CERTIFICATE_ID_PREFIX,
        issued.format("%Y%m%d"),
        suffix
    )
}

/// Builds and persists the certificate for a completed wipe
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    key: Arc<SigningKey>,
}

impl CertificateIssuer {
    pub fn new(key: Arc<SigningKey>) -> Self {
        Self { key }
    }

    pub fn signing_key(&self) -> Arc<SigningKey> {
        Arc::clone(&self.key)
    }

    /// Certificate content for `session` under the given id
    pub fn draft(
        &self,
        session: &WipeSession,
        certificate_id: String,
    ) -> WorkflowResult<NewCertificate> {
        let wipe_standard = session
            .wipe_method
            .ok_or(WorkflowError::MissingField("wipe_method"))?;

        let organization = session
            .organization
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(DEFAULT_ORGANIZATION)
            .to_string();
        let target_description = format!("{} - {}", session.wipe_type, session.target_path);
        let compliance_standards: Vec<String> = wipe_standard
            .compliance_standards()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let verification_hash = self.key.sign(&signing_payload(
            &certificate_id,
            &session.id,
            &organization,
            &target_description,
            wipe_standard,
            &compliance_standards,
        ));

        Ok(NewCertificate {
            certificate_id,
            session_id: session.id.clone(),
            organization,
            target_description,
            wipe_standard,
            verification_hash,
            compliance_standards,
        })
    }

    /// Create the certificate for `session` under a certificate id no other
    /// stored certificate uses, completing the session with `completion` in
    /// the same store write
    pub fn issue(
        &self,
        store: &dyn RecordStore,
        session: &WipeSession,
        completion: SessionPatch,
    ) -> WorkflowResult<(WipeSession, Certificate)> {
        let rng = RingSystemRNG::new();

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let suffix = rng
                .hex_token(CERTIFICATE_ID_RANDOM_BYTES)
                .map_err(|e| WorkflowError::Issuance(e.to_string()))?;
            let certificate_id = format_certificate_id(Utc::now(), &suffix);
            let draft = self.draft(session, certificate_id)?;

            match store.complete_session(draft, completion.clone()) {
                Ok((completed, certificate)) => {
                    tracing::info!(
                        session_id = %session.id,
                        certificate_id = %certificate.certificate_id,
                        "Certificate issued"
                    );
                    return Ok((completed, certificate));
                }
                Err(StoreError::Conflict {
                    kind: RecordKind::Certificate,
                    ..
                }) => {
                    tracing::debug!(attempt, "Certificate id collision, drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(WorkflowError::Issuance(format!(
            "no unique certificate id after {} attempts",
            MAX_ID_ATTEMPTS
        )))
    }
}

/// Write a certificate as pretty-printed JSON
pub fn save_certificate(certificate: &Certificate, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json_data = serde_json::to_string_pretty(certificate)?;
    std::fs::write(path, json_data)
        .with_context(|| format!("Failed to write certificate to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::{NewWipeSession, Platform, SessionStatus, WipeType, CERTIFICATE_VALIDITY_DAYS};

    fn test_key() -> Arc<SigningKey> {
        Arc::new(SigningKey::from_bytes(&[7u8; 32]).unwrap())
    }

    fn wiped_session(store: &InMemoryStore, organization: Option<&str>) -> WipeSession {
        let session = store
            .create_session(NewWipeSession {
                session_name: "Office PC".to_string(),
                wipe_type: WipeType::FullDisk,
                target_path: "/dev/sda".to_string(),
                platform: Platform::Windows,
                organization: organization.map(String::from),
            })
            .unwrap();
        store
            .update_session(
                &session.id,
                SessionPatch {
                    wipe_method: Some(WipeMethod::Dod7Pass),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn test_signing_key_rejects_short_or_bad_hex() {
        assert!(SigningKey::from_bytes(&[1u8; 8]).is_err());
        assert!(SigningKey::from_hex("not-hex").is_err());
        assert!(SigningKey::from_hex(&"ab".repeat(16)).is_ok());
    }

    #[test]
    fn test_sign_and_verify() {
        let key = test_key();
        let tag = key.sign(b"payload");
        assert_eq!(tag.len(), 64);
        assert!(key.verify(b"payload", &tag));
        assert!(!key.verify(b"payload2", &tag));
        assert!(!key.verify(b"payload", "zz"));

        let other = SigningKey::from_bytes(&[8u8; 32]).unwrap();
        assert!(!other.verify(b"payload", &tag));
    }

    #[test]
    fn test_certificate_id_format() {
        let issued = "2024-08-15T10:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            format_certificate_id(issued, "0A1B2C3D4E"),
            "CERT-20240815-0A1B2C3D4E"
        );
    }

    #[test]
    fn test_issue_derives_fields_from_session() {
        let store = InMemoryStore::new();
        let session = wiped_session(&store, None);
        let issuer = CertificateIssuer::new(test_key());

        let (completed, cert) = issuer
            .issue(
                &store,
                &session,
                SessionPatch {
                    size_gb: Some(500),
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(cert.certificate_id.starts_with("CERT-"));
        assert_eq!(cert.certificate_id.len(), "CERT-YYYYMMDD-".len() + 10);
        assert_eq!(cert.session_id, session.id);
        assert_eq!(cert.organization, DEFAULT_ORGANIZATION);
        assert_eq!(cert.target_description, "full_disk - /dev/sda");
        assert_eq!(cert.wipe_standard, WipeMethod::Dod7Pass);
        assert_eq!(
            cert.compliance_standards,
            vec!["DoD 5220.22-M".to_string(), "NIST 800-88".to_string()]
        );
        assert_eq!(
            cert.expiry_date - cert.created_date,
            chrono::Duration::days(CERTIFICATE_VALIDITY_DAYS)
        );
        assert!(cert.is_verified);
        assert!(verification_hash_matches(&test_key(), &cert));

        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.size_gb, Some(500));
        assert_eq!(completed.certificate_id.as_deref(), Some(cert.certificate_id.as_str()));
        assert_eq!(store.find_session(&session.id).unwrap(), Some(completed));
    }

    #[test]
    fn test_issue_keeps_named_organization() {
        let store = InMemoryStore::new();
        let session = wiped_session(&store, Some("Acme Corp"));
        let (_, cert) = CertificateIssuer::new(test_key())
            .issue(&store, &session, SessionPatch::default())
            .unwrap();
        assert_eq!(cert.organization, "Acme Corp");
    }

    #[test]
    fn test_issue_without_method_is_rejected() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(NewWipeSession {
                session_name: "x".to_string(),
                wipe_type: WipeType::Folder,
                target_path: "/tmp/x".to_string(),
                platform: Platform::Linux,
                organization: None,
            })
            .unwrap();

        let err = CertificateIssuer::new(test_key())
            .issue(&store, &session, SessionPatch::default())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::MissingField("wipe_method")));
        assert_eq!(
            store.find_session(&session.id).unwrap().unwrap().status,
            SessionStatus::Pending
        );
    }

    #[test]
    fn test_tampered_certificate_fails_hash_check() {
        let store = InMemoryStore::new();
        let session = wiped_session(&store, Some("Acme Corp"));
        let (_, mut cert) = CertificateIssuer::new(test_key())
            .issue(&store, &session, SessionPatch::default())
            .unwrap();

        cert.organization = "Someone Else".to_string();
        assert!(!verification_hash_matches(&test_key(), &cert));
    }

    #[test]
    fn test_save_certificate_writes_json() {
        let store = InMemoryStore::new();
        let session = wiped_session(&store, None);
        let (_, cert) = CertificateIssuer::new(test_key())
            .issue(&store, &session, SessionPatch::default())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.json");
        save_certificate(&cert, &path).unwrap();

        let loaded: Certificate =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, cert);
    }
}
