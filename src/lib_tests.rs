// Tests for lib.rs core types and enums
//
// Covers error classification, enum parsing and wire names, the algorithm
// catalog, record construction, and partial session updates.

use super::*;
use test_case::test_case;

fn new_session() -> NewWipeSession {
    NewWipeSession {
        session_name: "Decommission laptop".to_string(),
        wipe_type: WipeType::FullDisk,
        target_path: "/dev/nvme0n1".to_string(),
        platform: Platform::Linux,
        organization: Some("Acme".to_string()),
    }
}

fn created() -> DateTime<Utc> {
    "2024-03-01T12:00:00Z".parse().unwrap()
}

// ==================== ERROR TESTS ====================

#[test]
fn test_retryable_errors() {
    let capability = WorkflowError::Capability {
        operation: Operation::Wipe,
        source: CapabilityError::Failed("write error".to_string()),
    };
    let stalled = WorkflowError::Stalled {
        operation: Operation::HealthCheck,
        after: std::time::Duration::from_secs(30),
    };

    assert!(capability.is_retryable());
    assert!(stalled.is_retryable());
    assert!(WorkflowError::Issuance("no id".to_string()).is_retryable());
    assert!(!WorkflowError::MissingField("platform").is_retryable());
    assert!(!WorkflowError::Cancelled(Operation::Wipe).is_retryable());
    assert!(!WorkflowError::InvalidTransition {
        operation: "confirm_wipe",
        state: WorkflowState::Configuring,
    }
    .is_retryable());
}

#[test]
fn test_error_messages() {
    let err = WorkflowError::InvalidField {
        field: "platform",
        value: "beos".to_string(),
    };
    assert_eq!(err.to_string(), "Invalid value for platform: beos");

    let err = WorkflowError::Capability {
        operation: Operation::HealthCheck,
        source: CapabilityError::Unavailable("no SMART support".to_string()),
    };
    assert!(err.to_string().starts_with("health check capability failed"));
    assert!(err.to_string().contains("no SMART support"));

    assert_eq!(
        WorkflowError::Cancelled(Operation::Extraction).to_string(),
        "document extraction cancelled"
    );
}

#[test]
fn test_store_error_converts() {
    let err: WorkflowError = store::StoreError::NotFound {
        kind: store::RecordKind::Session,
        id: "sess-1".to_string(),
    }
    .into();
    assert!(matches!(err, WorkflowError::Store(_)));
    assert!(err.is_retryable());
}

// ==================== ENUM TESTS ====================

#[test_case("folder", WipeType::Folder)]
#[test_case("full_disk", WipeType::FullDisk)]
fn test_wipe_type_parse(raw: &str, expected: WipeType) {
    assert_eq!(raw.parse::<WipeType>().unwrap(), expected);
    assert_eq!(expected.to_string(), raw);
}

#[test_case("windows", Platform::Windows)]
#[test_case("linux", Platform::Linux)]
#[test_case("mac", Platform::Mac)]
#[test_case("android", Platform::Android)]
fn test_platform_parse(raw: &str, expected: Platform) {
    assert_eq!(raw.parse::<Platform>().unwrap(), expected);
    assert_eq!(
        serde_json::to_value(expected).unwrap(),
        serde_json::json!(raw)
    );
}

#[test_case("health_check", SessionStatus::HealthCheck)]
#[test_case("aborted", SessionStatus::Aborted)]
fn test_session_status_parse(raw: &str, expected: SessionStatus) {
    assert_eq!(raw.parse::<SessionStatus>().unwrap(), expected);
}

#[test]
fn test_unknown_variants_rejected() {
    let err = "FullDisk".parse::<WipeType>().unwrap_err();
    assert_eq!(err.kind, "wipe type");
    assert_eq!(err.value, "FullDisk");

    assert!("macos".parse::<Platform>().is_err());
    assert!("done".parse::<SessionStatus>().is_err());
    assert_eq!(
        "dod".parse::<WipeMethod>().unwrap_err().to_string(),
        "unknown wipe method: 'dod'"
    );
}

#[test]
fn test_active_statuses() {
    let active: Vec<_> = SessionStatus::ALL
        .into_iter()
        .filter(|s| s.is_active())
        .collect();
    assert_eq!(
        active,
        vec![
            SessionStatus::Pending,
            SessionStatus::HealthCheck,
            SessionStatus::Wiping
        ]
    );
}

// ==================== CATALOG TESTS ====================

#[test]
fn test_catalog_ids_round_trip() {
    for method in WipeMethod::CATALOG {
        assert_eq!(method.as_str().parse::<WipeMethod>().unwrap(), method);
        assert_eq!(
            serde_json::to_value(method).unwrap(),
            serde_json::json!(method.as_str())
        );
        assert!(!method.label().is_empty());
        assert!(!method.description().is_empty());
    }
}

#[test_case(WipeMethod::Dod3Pass, 3)]
#[test_case(WipeMethod::Dod7Pass, 7)]
#[test_case(WipeMethod::Gutmann35Pass, 35)]
#[test_case(WipeMethod::RandomSingle, 1)]
#[test_case(WipeMethod::ZeroFill, 1)]
fn test_passes(method: WipeMethod, passes: u32) {
    assert_eq!(method.passes(), passes);
}

#[test]
fn test_every_method_attests_nist() {
    for method in WipeMethod::CATALOG {
        assert!(method.compliance_standards().contains(&"NIST 800-88"));
    }
    assert!(WipeMethod::Dod7Pass
        .compliance_standards()
        .contains(&"DoD 5220.22-M"));
}

// ==================== RECORD TESTS ====================

#[test]
fn test_new_session_starts_pending() {
    let session = new_session().into_record("sess-1".to_string(), created());

    assert_eq!(session.id, "sess-1");
    assert_eq!(session.status, SessionStatus::Pending);
    assert_eq!(session.created_date, created());
    assert!(session.wipe_method.is_none());
    assert!(session.health_score.is_none());
    assert!(session.certificate_id.is_none());
}

#[test]
fn test_certificate_expires_after_one_year() {
    let certificate = NewCertificate {
        certificate_id: "CERT-20240301-ABCDEF0123".to_string(),
        session_id: "sess-1".to_string(),
        organization: "Acme".to_string(),
        target_description: "full_disk - /dev/nvme0n1".to_string(),
        wipe_standard: WipeMethod::Dod3Pass,
        verification_hash: "00".repeat(32),
        compliance_standards: vec!["NIST 800-88".to_string()],
    }
    .into_record("cert-1".to_string(), created());

    assert!(certificate.is_verified);
    assert_eq!(
        certificate.expiry_date - certificate.created_date,
        Duration::days(CERTIFICATE_VALIDITY_DAYS)
    );
    assert_eq!(certificate.expiry_date.to_rfc3339(), "2025-03-01T12:00:00+00:00");
}

#[test]
fn test_patch_only_touches_set_fields() {
    let mut session = new_session().into_record("sess-1".to_string(), created());
    let before = session.clone();

    SessionPatch::default().apply(&mut session);
    assert_eq!(session, before);

    SessionPatch {
        wipe_method: Some(WipeMethod::ZeroFill),
        health_score: Some(88),
        ..SessionPatch::status(SessionStatus::HealthCheck)
    }
    .apply(&mut session);

    assert_eq!(session.status, SessionStatus::HealthCheck);
    assert_eq!(session.wipe_method, Some(WipeMethod::ZeroFill));
    assert_eq!(session.health_score, Some(88));
    assert_eq!(session.session_name, before.session_name);
    assert_eq!(session.organization, before.organization);
}

#[test]
fn test_patch_can_clear_organization() {
    let mut session = new_session().into_record("sess-1".to_string(), created());

    SessionPatch {
        organization: Some(None),
        ..Default::default()
    }
    .apply(&mut session);

    assert_eq!(session.organization, None);
}

#[test]
fn test_session_json_shape() {
    let session = new_session().into_record("sess-1".to_string(), created());
    let value = serde_json::to_value(&session).unwrap();

    assert_eq!(value["wipe_type"], "full_disk");
    assert_eq!(value["status"], "pending");
    assert_eq!(value["platform"], "linux");
    assert!(value["health_score"].is_null());

    let back: WipeSession = serde_json::from_value(value).unwrap();
    assert_eq!(back, session);
}
