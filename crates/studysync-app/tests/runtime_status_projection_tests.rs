//! Integration tests for runtime status projection.

use studysync_app::{AppConfig, project_runtime_status};
use studysync_core::SyncStatus;

#[test]
fn runtime_status_projection_tests_reflects_sync_state() {
    let config = AppConfig::from_lookup(|key| match key {
        "STUDYSYNC_SYNC_ENDPOINT" => Some("https://api.example.test/sync".to_string()),
        _ => None,
    })
    .expect("env should be valid");
    let status = SyncStatus {
        is_pending: false,
        last_sync_at: Some(1_000),
        failed_attempts: 3,
        next_retry_at: Some(9_000),
        queued_events: 4,
    };

    let snapshot = project_runtime_status(&config, &status, 1_000);
    assert!(snapshot.capture_allowed);
    assert!(snapshot.online);
    assert_eq!(snapshot.sync, "Degraded");
    assert_eq!(snapshot.sync_label, "4 events waiting, retry 3 in 8s");
    assert_eq!(snapshot.queued_events, 4);
}
