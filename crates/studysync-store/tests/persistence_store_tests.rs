//! Integration tests for the durable pending-event slot.

use std::sync::Arc;

use serde_json::json;
use studysync_core::{CaptureEvent, EventKind};
use studysync_store::{DEFAULT_PENDING_KEY, KeyValueStore, MemoryStore, PersistenceStore};

fn fixture_events(count: usize) -> Vec<CaptureEvent> {
    (0..count)
        .map(|index| CaptureEvent {
            id: format!("evt-{index}"),
            kind: EventKind::StudyHeartbeat,
            session_ref: "session-1".to_string(),
            payload: json!({ "activeTimeMs": index * 1_000 }),
            timestamp: 1_000 + index as u64,
        })
        .collect()
}

#[test]
fn persistence_store_tests_missing_slot_loads_empty() {
    let store = PersistenceStore::new(Arc::new(MemoryStore::new()));
    assert!(store.load().is_empty());
}

#[test]
fn persistence_store_tests_round_trip_preserves_order() {
    let store = PersistenceStore::new(Arc::new(MemoryStore::new()));
    let events = fixture_events(4);

    assert!(store.save(&events, usize::MAX));
    assert_eq!(store.load(), events);
}

#[test]
fn persistence_store_tests_corrupted_slot_is_cleared() {
    let backend = Arc::new(MemoryStore::new());
    backend.insert_raw(DEFAULT_PENDING_KEY, "{not json");
    let store = PersistenceStore::new(backend.clone());

    assert!(store.load().is_empty());
    assert!(!backend.contains(DEFAULT_PENDING_KEY));
}

#[test]
fn persistence_store_tests_over_budget_evicts_oldest_thirty_percent() {
    let backend = Arc::new(MemoryStore::new());
    let store = PersistenceStore::new(backend);
    let events = fixture_events(10);
    let full_size = serde_json::to_vec(&events).unwrap().len();

    let report = store.save_with_report(&events, full_size - 1);
    assert!(report.persisted);
    assert_eq!(report.evicted, 3);

    let loaded = store.load();
    assert_eq!(loaded.len(), 7);
    assert_eq!(loaded[0].id, "evt-3");
    assert_eq!(loaded[6].id, "evt-9");
}

#[test]
fn persistence_store_tests_quota_failure_reports_nothing_persisted() {
    let backend = Arc::new(MemoryStore::with_capacity(16));
    let store = PersistenceStore::new(backend.clone());

    assert!(!store.save(&fixture_events(5), usize::MAX));
    assert!(backend.get(DEFAULT_PENDING_KEY).unwrap().is_none());
}

#[test]
fn persistence_store_tests_clear_removes_slot() {
    let backend = Arc::new(MemoryStore::new());
    let store = PersistenceStore::with_key(backend.clone(), "tenant-a:pending");
    assert!(store.save(&fixture_events(1), usize::MAX));
    assert!(backend.contains("tenant-a:pending"));

    store.clear();
    assert!(!backend.contains("tenant-a:pending"));
}
