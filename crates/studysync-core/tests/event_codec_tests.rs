//! Tests the wire shape of capture events and sync requests.

use serde_json::json;
use studysync_core::{CaptureEvent, EventKind, SyncRequest};

fn fixture_event() -> CaptureEvent {
    CaptureEvent {
        id: "evt-1".to_string(),
        kind: EventKind::QuestionView,
        session_ref: "practice-42".to_string(),
        payload: json!({ "questionId": "q-1" }),
        timestamp: 1_700_000_000_000,
    }
}

#[test]
fn event_codec_tests_use_wire_field_names() {
    let encoded = serde_json::to_value(fixture_event()).expect("event should encode");
    assert_eq!(encoded["type"], "QUESTION_VIEW");
    assert_eq!(encoded["sessionRef"], "practice-42");
    assert_eq!(encoded["payload"]["questionId"], "q-1");
    assert!(encoded.get("kind").is_none());
}

#[test]
fn event_codec_tests_sync_request_survives_decoding() {
    let request = SyncRequest {
        events: vec![fixture_event()],
        client_timestamp: 1_700_000_000_500,
        batch_id: "abc".to_string(),
    };

    let encoded = request.to_json_bytes().expect("encoding should succeed");
    let raw: serde_json::Value = serde_json::from_slice(&encoded).expect("valid json");
    assert_eq!(raw["clientTimestamp"], 1_700_000_000_500_u64);
    assert_eq!(raw["batchId"], "abc");

    let decoded = SyncRequest::from_json_bytes(&encoded).expect("decoding should succeed");
    assert_eq!(decoded, request);
}
