//! Shared fixtures for capture integration tests.

use std::sync::{Arc, Mutex};

use studysync_buffer::EventBuffer;
use studysync_capture::{CreateSessionRequest, SessionApi, SessionApiError, StudyMetrics};
use studysync_core::{BufferConfig, CaptureEvent, EventKind, SyncRequest};
use studysync_store::{MemoryStore, PersistenceStore};
use studysync_upload::{SyncTransport, UploadError};

/// Transport that records batches and accepts or rejects all of them.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    reject: bool,
    sent: Mutex<Vec<SyncRequest>>,
    best_effort: Mutex<Vec<SyncRequest>>,
}

#[allow(dead_code)]
impl RecordingTransport {
    /// Transport accepting every batch.
    pub fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport failing every batch.
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            reject: true,
            ..Self::default()
        })
    }

    /// Every event delivered through `send`, in order.
    pub fn delivered(&self) -> Vec<CaptureEvent> {
        self.sent
            .lock()
            .expect("sent lock should work")
            .iter()
            .flat_map(|request| request.events.clone())
            .collect()
    }

    /// Number of best-effort deliveries.
    pub fn best_effort_count(&self) -> usize {
        self.best_effort.lock().expect("best-effort lock should work").len()
    }
}

impl SyncTransport for RecordingTransport {
    fn send(&self, request: &SyncRequest) -> Result<(), UploadError> {
        self.sent
            .lock()
            .expect("sent lock should work")
            .push(request.clone());
        if self.reject {
            Err(UploadError::Connection("offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn send_best_effort(&self, request: &SyncRequest) {
        self.best_effort
            .lock()
            .expect("best-effort lock should work")
            .push(request.clone());
    }
}

/// Session API returning a fixed id (or failing) and recording updates.
#[derive(Debug, Default)]
pub struct RecordingSessionApi {
    session_id: Option<String>,
    fail_updates: bool,
    creates: Mutex<u32>,
    updates: Mutex<Vec<String>>,
    best_effort_updates: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingSessionApi {
    /// API that issues `session_id` for every create call.
    pub fn issuing(session_id: &str) -> Arc<Self> {
        Arc::new(Self {
            session_id: Some(session_id.to_string()),
            ..Self::default()
        })
    }

    /// API whose create calls fail.
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// API issuing ids but rejecting metric updates.
    pub fn rejecting_updates(session_id: &str) -> Arc<Self> {
        Arc::new(Self {
            session_id: Some(session_id.to_string()),
            fail_updates: true,
            ..Self::default()
        })
    }

    /// Number of create calls.
    pub fn creates(&self) -> u32 {
        *self.creates.lock().expect("create lock should work")
    }

    /// Session ids passed to `update_session`.
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().expect("update lock should work").clone()
    }

    /// Session ids passed to `update_session_best_effort`.
    pub fn best_effort_updates(&self) -> Vec<String> {
        self.best_effort_updates
            .lock()
            .expect("best-effort lock should work")
            .clone()
    }
}

impl SessionApi for RecordingSessionApi {
    fn create_session(&self, _request: &CreateSessionRequest) -> Result<String, SessionApiError> {
        *self.creates.lock().expect("create lock should work") += 1;
        self.session_id
            .clone()
            .ok_or_else(|| SessionApiError::Unavailable("offline".to_string()))
    }

    fn update_session(
        &self,
        session_id: &str,
        _metrics: &StudyMetrics,
    ) -> Result<(), SessionApiError> {
        self.updates
            .lock()
            .expect("update lock should work")
            .push(session_id.to_string());
        if self.fail_updates {
            Err(SessionApiError::Rejected(503))
        } else {
            Ok(())
        }
    }

    fn update_session_best_effort(&self, session_id: &str, _metrics: &StudyMetrics) {
        self.best_effort_updates
            .lock()
            .expect("best-effort lock should work")
            .push(session_id.to_string());
    }
}

/// Buffer whose own timers stay out of the way of capture timing.
#[allow(dead_code)]
pub fn quiet_buffer(transport: Arc<RecordingTransport>) -> EventBuffer {
    let config = BufferConfig {
        max_size: 10_000,
        flush_interval_ms: 100_000_000,
        ..BufferConfig::default()
    };
    EventBuffer::new(
        config,
        PersistenceStore::new(Arc::new(MemoryStore::new())),
        transport,
        0,
    )
    .expect("buffer config should be valid")
}

/// Kinds of the queued events, in order.
#[allow(dead_code)]
pub fn queued_kinds(buffer: &EventBuffer) -> Vec<EventKind> {
    buffer.events().iter().map(|event| event.kind).collect()
}
