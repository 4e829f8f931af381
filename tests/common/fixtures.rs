use std::sync::Arc;
use std::time::Duration;
use wipe_certify::crypto::{CertificateIssuer, SigningKey};
use wipe_certify::executor::{Overwriter, WipeExecutor};
use wipe_certify::health::{HealthEvaluator, HealthProbe};
use wipe_certify::store::RecordStore;
use wipe_certify::{SessionForm, WipeWorkflow};

pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixed key so hashes can be re-checked by a second engine
pub fn signing_key() -> Arc<SigningKey> {
    Arc::new(SigningKey::from_bytes(&[7u8; 32]).expect("valid key"))
}

pub fn form(name: &str, target: &str) -> SessionForm {
    SessionForm {
        session_name: name.to_string(),
        wipe_type: "full_disk".to_string(),
        target_path: target.to_string(),
        platform: "linux".to_string(),
        organization: Some("Acme Recycling".to_string()),
    }
}

pub fn workflow(
    store: Arc<dyn RecordStore>,
    probe: Arc<dyn HealthProbe>,
    overwriter: Arc<dyn Overwriter>,
) -> WipeWorkflow {
    WipeWorkflow::new(
        store,
        Arc::new(HealthEvaluator::new(probe, STALL_TIMEOUT)),
        Arc::new(WipeExecutor::new(overwriter, STALL_TIMEOUT)),
        Arc::new(CertificateIssuer::new(signing_key())),
    )
}
