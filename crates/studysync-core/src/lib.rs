#![warn(missing_docs)]
//! # studysync-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `studysync` workspace.
//!
//! ## Responsibilities
//! - Represent captured behavioral events and the sync request that carries them.
//! - Hold the immutable buffer configuration and the observable sync status.
//! - Model per-session time accounting state for capture state machines.
//! - Generate collision-free event identifiers.
//! - Provide deadline/interval timer primitives driven by an injected clock.
//!
//! ## Data flow
//! Capture state machines build [`NewEvent`] values; the event buffer stamps
//! them into [`CaptureEvent`]s, queues them and ships snapshots as
//! [`SyncRequest`] batches. [`SyncStatus`] snapshots flow back to observers.
//!
//! ## Ownership and lifetimes
//! Events own their payloads (`serde_json::Value`) so they can move between the
//! in-memory queue, the durable slot and transport batches without borrowing.
//!
//! ## Error model
//! Invalid configuration and codec failures return [`CoreError`].
//!
//! ## Security and privacy notes
//! Payloads are opaque to this crate and are never logged here.
//!
//! ## Example
//! ```rust
//! use studysync_core::{BufferConfig, Deadline};
//!
//! BufferConfig::default().validate().expect("defaults are valid");
//!
//! let mut persist = Deadline::default();
//! assert!(persist.arm_if_idle(1_000, 500));
//! assert!(!persist.arm_if_idle(1_200, 500));
//! assert_eq!(persist.take_if_due(1_500), Some(1_500));
//! ```

mod timer;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use timer::{Deadline, Interval};

/// Coalescing window for durable-slot writes triggered by pushes.
pub const PERSIST_THROTTLE_MS: u64 = 1_000;

/// Debounce window for status snapshot publication.
pub const STATUS_DEBOUNCE_MS: u64 = 500;

/// Closed set of behavioral event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Study session started.
    StudyStart,
    /// Study session became idle.
    StudyIdleStart,
    /// Study session returned from idle.
    StudyIdleEnd,
    /// Page visibility flipped during a study session.
    StudyVisibilityChange,
    /// Debounced scroll depth measurement.
    StudyScroll,
    /// Periodic progress snapshot while engaged.
    StudyHeartbeat,
    /// Study session finished.
    StudyEnd,
    /// Practice session capture initialized.
    SessionStart,
    /// A practice question was shown.
    QuestionView,
    /// Navigation away from a practice question.
    QuestionNavigate,
    /// An answer was edited.
    AnswerChange,
    /// An answer was submitted.
    AnswerSubmit,
    /// A question was skipped.
    AnswerSkip,
    /// Practice session finished.
    SessionComplete,
}

impl EventKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StudyStart => "STUDY_START",
            Self::StudyIdleStart => "STUDY_IDLE_START",
            Self::StudyIdleEnd => "STUDY_IDLE_END",
            Self::StudyVisibilityChange => "STUDY_VISIBILITY_CHANGE",
            Self::StudyScroll => "STUDY_SCROLL",
            Self::StudyHeartbeat => "STUDY_HEARTBEAT",
            Self::StudyEnd => "STUDY_END",
            Self::SessionStart => "SESSION_START",
            Self::QuestionView => "QUESTION_VIEW",
            Self::QuestionNavigate => "QUESTION_NAVIGATE",
            Self::AnswerChange => "ANSWER_CHANGE",
            Self::AnswerSubmit => "ANSWER_SUBMIT",
            Self::AnswerSkip => "ANSWER_SKIP",
            Self::SessionComplete => "SESSION_COMPLETE",
        }
    }
}

/// Event produced by a capture state machine before the buffer stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Event kind.
    pub kind: EventKind,
    /// Logical session the event belongs to.
    pub session_ref: String,
    /// Structured per-kind data.
    pub payload: serde_json::Value,
}

impl NewEvent {
    /// Creates an event from an already-structured JSON payload.
    pub fn new(kind: EventKind, session_ref: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            session_ref: session_ref.into(),
            payload,
        }
    }

    /// Creates an event from any serializable payload type.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when the payload cannot be represented as JSON.
    pub fn with_payload<T: Serialize>(
        kind: EventKind,
        session_ref: impl Into<String>,
        payload: &T,
    ) -> Result<Self, CoreError> {
        Ok(Self::new(kind, session_ref, serde_json::to_value(payload)?))
    }
}

/// One timestamped behavioral record queued for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    /// Unique id assigned at capture time; never reused.
    pub id: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Logical session the event belongs to.
    pub session_ref: String,
    /// Structured per-kind data.
    pub payload: serde_json::Value,
    /// Client clock in Unix epoch milliseconds.
    pub timestamp: u64,
}

/// Body accepted by the sync endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Events in queue order.
    pub events: Vec<CaptureEvent>,
    /// Client clock when the batch was assembled.
    pub client_timestamp: u64,
    /// Deterministic identifier of the batch contents.
    pub batch_id: String,
}

impl SyncRequest {
    /// Serializes the request to compact JSON bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when JSON serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec(self).map_err(CoreError::Codec)
    }

    /// Deserializes a request from JSON bytes.
    ///
    /// # Errors
    /// Returns [`CoreError::Codec`] when JSON decoding fails.
    pub fn from_json_bytes(raw: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(raw).map_err(CoreError::Codec)
    }
}

/// Buffer tuning, immutable for the lifetime of one buffer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferConfig {
    /// Queue length that triggers an immediate flush.
    pub max_size: usize,
    /// Period of the recurring flush trigger.
    pub flush_interval_ms: u64,
    /// Byte budget of the durable slot.
    pub max_persisted_bytes: usize,
    /// First retry delay after a failed flush.
    pub retry_base_delay_ms: u64,
    /// Upper bound of any retry delay.
    pub retry_max_delay_ms: u64,
    /// Number of scheduled retries before automatic retrying stops.
    pub retry_max_attempts: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            flush_interval_ms: 30_000,
            max_persisted_bytes: 4 * 1024 * 1024,
            retry_base_delay_ms: 2_000,
            retry_max_delay_ms: 120_000,
            retry_max_attempts: 5,
        }
    }
}

impl BufferConfig {
    /// Checks that every knob is usable.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidConfig`] for zero values or a base retry
    /// delay larger than the maximum.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_size == 0 {
            return Err(CoreError::InvalidConfig("max_size must be > 0".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "flush_interval_ms must be > 0".to_string(),
            ));
        }
        if self.max_persisted_bytes == 0 {
            return Err(CoreError::InvalidConfig(
                "max_persisted_bytes must be > 0".to_string(),
            ));
        }
        if self.retry_base_delay_ms == 0 || self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(CoreError::InvalidConfig(format!(
                "retry delays must satisfy 0 < base ({}) <= max ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Observable sync snapshot published to UI observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// A flush request is in flight.
    pub is_pending: bool,
    /// Client time of the last acknowledged flush.
    pub last_sync_at: Option<u64>,
    /// Consecutive failures counted by the retry scheduler.
    pub failed_attempts: u32,
    /// Client time of the next scheduled retry.
    pub next_retry_at: Option<u64>,
    /// Queue length at the moment of publication.
    pub queued_events: usize,
}

/// Time accounting and engagement state of one capture session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Server-issued or locally generated session id.
    pub session_id: String,
    /// Session has started and not yet ended.
    pub is_active: bool,
    /// Page is currently visible.
    pub is_visible: bool,
    /// Visible page with no qualifying input for the idle timeout.
    pub is_idle: bool,
    /// Milliseconds spent visible and active.
    pub total_active_time: u64,
    /// Milliseconds spent visible and idle.
    pub total_idle_time: u64,
    /// Milliseconds spent hidden.
    pub total_hidden_time: u64,
    /// Deepest scroll position reached, in percent.
    pub scroll_depth_max: u8,
    /// Latest measured scroll position, in percent.
    pub scroll_depth_current: u8,
    /// Number of visibility flips.
    pub visibility_changes: u32,
    /// Client time of the last qualifying input.
    pub last_activity_at: u64,
    /// Client time the session started.
    pub started_at: u64,
}

impl SessionState {
    /// Creates the state of a freshly started session.
    pub fn started(session_id: impl Into<String>, visible: bool, now_ms: u64) -> Self {
        Self {
            session_id: session_id.into(),
            is_active: true,
            is_visible: visible,
            last_activity_at: now_ms,
            started_at: now_ms,
            ..Self::default()
        }
    }

    /// Sum of all three time-accounting buckets.
    pub fn accounted_time(&self) -> u64 {
        self.total_active_time + self.total_idle_time + self.total_hidden_time
    }
}

/// Generates unique event identifiers.
///
/// Ids combine the capture time, a per-generator sequence number and a random
/// salt, so they stay unique within one generator and across page reloads.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: &'static str,
    sequence: u64,
    rng: StdRng,
}

impl IdGenerator {
    /// Creates a generator seeded from the operating system.
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            sequence: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Creates a reproducible generator for tests and fixtures.
    pub fn seeded(prefix: &'static str, seed: u64) -> Self {
        Self {
            prefix,
            sequence: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the next identifier.
    pub fn next_id(&mut self, now_ms: u64) -> String {
        self.sequence += 1;
        let salt: u64 = self.rng.random();
        format!("{}-{now_ms:x}-{:x}-{salt:016x}", self.prefix, self.sequence)
    }
}

/// Returns the current wall clock in Unix epoch milliseconds.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Error type for core validation and codec failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// JSON encoding/decoding error.
    #[error("event codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}
