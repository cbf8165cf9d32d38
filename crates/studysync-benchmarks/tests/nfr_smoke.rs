//! Benchmark smoke test for the capture, persist and flush loop.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use studysync_buffer::EventBuffer;
use studysync_core::{BufferConfig, EventKind, NewEvent, SyncRequest};
use studysync_store::{MemoryStore, PersistenceStore};
use studysync_upload::{SyncTransport, UploadError};

struct AcceptingTransport;

impl SyncTransport for AcceptingTransport {
    fn send(&self, request: &SyncRequest) -> Result<(), UploadError> {
        if request.events.is_empty() {
            return Err(UploadError::Client(400));
        }
        Ok(())
    }

    fn send_best_effort(&self, _request: &SyncRequest) {}
}

#[test]
fn benchmark_buffer_smoke_prints_latency() {
    let memory = Arc::new(MemoryStore::new());
    let mut buffer = EventBuffer::new(
        BufferConfig::default(),
        PersistenceStore::new(memory),
        Arc::new(AcceptingTransport),
        0,
    )
    .expect("default config should be valid");

    let start = Instant::now();

    for index in 0..10_000_u64 {
        let now = index * 10;
        buffer.push(
            NewEvent::new(
                EventKind::AnswerChange,
                "bench-session",
                json!({ "questionId": format!("q-{}", index % 40), "changeCount": index % 7 }),
            ),
            now,
        );
        buffer.poll(now);
    }
    buffer.force_flush(100_000);
    buffer.shutdown(100_000);

    let elapsed_ms = start.elapsed().as_millis();
    println!("benchmark_buffer_elapsed_ms={elapsed_ms}");
    let stats = buffer.stats();
    println!("benchmark_buffer_delivered_events={}", stats.delivered);
    println!("benchmark_buffer_persist_writes={}", stats.persist_writes);

    assert_eq!(stats.delivered, 10_000);
    assert!(buffer.is_empty());

    // This is a lightweight guardrail; strict NFR checks are environment-specific.
    assert!(
        elapsed_ms < 5_000,
        "buffer smoke benchmark should stay bounded"
    );
}
