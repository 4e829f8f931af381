/// SQLite record store integration tests
///
/// Runs complete workflows against a file database and checks that records,
/// ordering and verification survive a reopen.
mod common;

use common::capabilities::{ScriptedOverwriter, ScriptedProbe};
use common::fixtures::{form, signing_key, workflow};
use std::sync::Arc;
use tempfile::TempDir;
use wipe_certify::stats::DashboardStats;
use wipe_certify::store::{Query, RecordStore, SortSpec, SqliteStore};
use wipe_certify::verification::{JsonDocumentExtractor, VerificationEngine};
use wipe_certify::{SessionPatch, SessionStatus};

async fn run_session(store: Arc<SqliteStore>, name: &str, score: u8) -> Option<String> {
    let mut flow = workflow(
        store,
        Arc::new(ScriptedProbe::new(score)),
        Arc::new(ScriptedOverwriter::new(128, 20)),
    );
    flow.configure(form(name, "/dev/sdf")).unwrap();
    flow.select_algorithm("dod_3_pass").unwrap();
    flow.run_health_check().await.unwrap();

    match flow.confirm_wipe().await {
        Ok(certificate) => Some(certificate.certificate_id),
        Err(_) => None,
    }
}

#[tokio::test]
async fn test_workflow_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.db");

    let certificate_id = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let certified = run_session(store.clone(), "Kept", 85).await;
        assert!(run_session(store, "Rejected", 30).await.is_none());
        certified.unwrap()
    };

    let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open(&path).unwrap());

    let sessions = store.list_sessions(&SortSpec::ascending("session_name")).unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].session_name, "Kept");
    assert_eq!(sessions[0].status, SessionStatus::Completed);
    assert_eq!(sessions[1].session_name, "Rejected");
    assert_eq!(sessions[1].status, SessionStatus::Aborted);

    let engine = VerificationEngine::new(store.clone(), Arc::new(JsonDocumentExtractor))
        .with_signing_key(signing_key());
    let outcome = engine.verify_by_id(&certificate_id).unwrap();
    assert!(outcome.valid);
    assert_eq!(outcome.hash_verified, Some(true));

    let stats = DashboardStats::load(store.as_ref()).unwrap();
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.completed_sessions, 1);
    assert_eq!(stats.total_data_wiped_gb, 128);
    // (85 + 30) / 2 = 57.5
    assert_eq!(stats.average_health_score, 58);
}

#[tokio::test]
async fn test_filter_by_status() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("records.db")).unwrap());

    run_session(store.clone(), "A", 90).await.unwrap();
    run_session(store.clone(), "B", 10).await;
    run_session(store.clone(), "C", 90).await.unwrap();

    let completed = store
        .filter_sessions(&Query::eq("status", "completed"))
        .unwrap();
    let names: Vec<_> = completed.iter().map(|s| s.session_name.as_str()).collect();
    assert_eq!(names, vec!["A", "C"]);

    let by_certificate = store
        .filter_certificates(&Query::eq("session_id", completed[1].id.as_str()))
        .unwrap();
    assert_eq!(by_certificate.len(), 1);
    assert_eq!(
        completed[1].certificate_id.as_deref(),
        Some(by_certificate[0].certificate_id.as_str())
    );
}

#[test]
fn test_concurrent_updates_are_serialized() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("records.db")).unwrap());
    let session = store
        .create_session(form("Shared", "/dev/sdg").validate().unwrap())
        .unwrap();

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let store = Arc::clone(&store);
            let id = session.id.clone();
            std::thread::spawn(move || {
                store
                    .update_session(
                        &id,
                        SessionPatch {
                            health_score: Some(60 + i),
                            ..Default::default()
                        },
                    )
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = store.find_session(&session.id).unwrap().unwrap();
    let score = stored.health_score.unwrap();
    assert!((60..68).contains(&score));
    assert_eq!(stored.session_name, "Shared");
}
