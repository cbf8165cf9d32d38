//! Shared fixtures for event buffer integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use studysync_buffer::EventBuffer;
use studysync_core::{BufferConfig, EventKind, NewEvent, SyncRequest};
use studysync_store::{MemoryStore, PersistenceStore};
use studysync_upload::{SyncTransport, UploadError};

/// Transport that replays scripted results and records every request.
///
/// Once the script is exhausted every send falls back to `default_ok`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), UploadError>>>,
    default_ok: bool,
    sent: Mutex<Vec<SyncRequest>>,
    best_effort: Mutex<Vec<SyncRequest>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    /// Transport accepting every batch.
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self {
            default_ok: true,
            ..Self::default()
        })
    }

    /// Transport failing every batch with a timeout.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues one scripted result.
    pub fn then(&self, result: Result<(), UploadError>) -> &Self {
        self.script
            .lock()
            .expect("script lock should work")
            .push_back(result);
        self
    }

    /// Requests passed to `send`.
    pub fn sent(&self) -> Vec<SyncRequest> {
        self.sent.lock().expect("sent lock should work").clone()
    }

    /// Requests passed to `send_best_effort`.
    pub fn best_effort(&self) -> Vec<SyncRequest> {
        self.best_effort
            .lock()
            .expect("best-effort lock should work")
            .clone()
    }
}

impl SyncTransport for ScriptedTransport {
    fn send(&self, request: &SyncRequest) -> Result<(), UploadError> {
        self.sent
            .lock()
            .expect("sent lock should work")
            .push(request.clone());
        let scripted = self.script.lock().expect("script lock should work").pop_front();
        match scripted {
            Some(result) => result,
            None if self.default_ok => Ok(()),
            None => Err(UploadError::Timeout),
        }
    }

    fn send_best_effort(&self, request: &SyncRequest) {
        self.best_effort
            .lock()
            .expect("best-effort lock should work")
            .push(request.clone());
    }
}

/// Config with timers pushed far out so tests control every flush.
#[allow(dead_code)]
pub fn quiet_config() -> BufferConfig {
    BufferConfig {
        max_size: 1_000,
        flush_interval_ms: 10_000_000,
        ..BufferConfig::default()
    }
}

/// Builds a buffer over a shared memory store.
#[allow(dead_code)]
pub fn buffer_with(
    config: BufferConfig,
    memory: &Arc<MemoryStore>,
    transport: Arc<ScriptedTransport>,
    now_ms: u64,
) -> EventBuffer {
    EventBuffer::new(
        config,
        PersistenceStore::new(memory.clone()),
        transport,
        now_ms,
    )
    .expect("buffer config should be valid")
}

/// Reads back what the durable slot holds.
#[allow(dead_code)]
pub fn persisted(memory: &Arc<MemoryStore>) -> Vec<String> {
    PersistenceStore::new(memory.clone())
        .load()
        .into_iter()
        .map(|event| event.id)
        .collect()
}

/// Answer-change event for question `n`.
#[allow(dead_code)]
pub fn answer_change(n: u32) -> NewEvent {
    NewEvent::new(
        EventKind::AnswerChange,
        "session-1",
        serde_json::json!({ "questionId": format!("q{n}"), "changeCount": 1 }),
    )
}
