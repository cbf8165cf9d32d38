#![warn(missing_docs)]
//! # studysync-capture
//!
//! ## Purpose
//! Turns learner behavior into capture events: a study variant tracking
//! attention and visibility, and a practice variant tracking question
//! navigation and answers.
//!
//! ## Responsibilities
//! - Own one [`studysync_buffer::EventBuffer`] per capture instance.
//! - Account active, idle and hidden time so the three totals always sum to
//!   the elapsed session time.
//! - Create and finalize server session records, falling back to local ids.
//!   With the `http` feature, `HttpSessionApi` talks to
//!   `POST {base}/sessions` and `PATCH {base}/sessions/{id}`.
//! - Emit navigation, answer and summary events for practice sessions.
//!
//! ## Data flow
//! Host signals (input, visibility, scroll, question views) and `poll(now)`
//! -> state machine -> `NewEvent` -> owned buffer -> sync endpoint.
//!
//! ## Ownership and lifetimes
//! Each capture owns its buffer, timers and accumulators. Nothing is global;
//! ending a session cancels every timer it armed.
//!
//! ## Error model
//! Capture calls never fail. Session API errors ([`SessionApiError`]) are
//! absorbed into local-id fallbacks and best-effort updates.
//!
//! ## Security and privacy notes
//! Payloads carry ids, counters and durations only; answer contents are never
//! captured.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//!
//! use studysync_buffer::EventBuffer;
//! use studysync_capture::{OfflineSessionApi, StudyCapture, StudyConfig, is_local_session_id};
//! use studysync_core::BufferConfig;
//! use studysync_store::{MemoryStore, PersistenceStore};
//! use studysync_upload::OfflineTransport;
//!
//! let buffer = EventBuffer::new(
//!     BufferConfig::default(),
//!     PersistenceStore::new(Arc::new(MemoryStore::new())),
//!     Arc::new(OfflineTransport),
//!     0,
//! )
//! .expect("default config is valid");
//! let mut study = StudyCapture::new(StudyConfig::default(), "chapter-1", buffer, Arc::new(OfflineSessionApi));
//!
//! assert!(study.start(0));
//! assert!(is_local_session_id(study.session_id().unwrap_or_default()));
//! study.poll(90_000);
//! assert!(study.state().is_idle);
//! ```

mod api;
#[cfg(feature = "http")]
mod http;
mod practice;
mod study;

pub use api::{
    CreateSessionRequest, CreateSessionResponse, LOCAL_SESSION_PREFIX, OfflineSessionApi,
    SessionApi, SessionApiError, SessionEndpoints, StudyMetrics, is_local_session_id,
};
#[cfg(feature = "http")]
pub use http::HttpSessionApi;
pub use practice::{AnswerOutcome, PracticeCapture, PracticeSummary};
pub use study::{
    InputSignal, ScrollMetrics, StartTicket, StudyCapture, StudyConfig, StudyPhase, Visibility,
};
