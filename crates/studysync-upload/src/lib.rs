#![warn(missing_docs)]
//! # studysync-upload
//!
//! ## Purpose
//! Delivers event batches to the sync endpoint and decides how failed
//! deliveries are retried.
//!
//! ## Responsibilities
//! - Define the [`SyncTransport`] seam with a normal and a best-effort send.
//! - Derive deterministic batch ids so re-sent batches can be deduplicated.
//! - Compute exponential backoff and the give-up point ([`RetryScheduler`]).
//! - Classify failures as retriable or permanent.
//! - Validate sync endpoint URLs.
//!
//! ## Data flow
//! Event buffer snapshot -> [`sync_request_for`] -> [`SyncTransport::send`] ->
//! success, or [`UploadError`] -> [`classify_upload_error`] ->
//! [`RetryScheduler::record_failure`] -> retry delay or give up.
//!
//! ## Ownership and lifetimes
//! Transports are shared as `Arc<dyn SyncTransport>`; requests are borrowed for
//! the duration of one send.
//!
//! ## Error model
//! Transport failures are [`UploadError`] values. The best-effort path has no
//! error surface by contract.
//!
//! ## Security and privacy notes
//! Only batch ids and counts are logged, never event payloads.
//!
//! ## Example
//! ```rust
//! use studysync_upload::{RetryDecision, RetryPolicy, RetryScheduler};
//!
//! let mut retry = RetryScheduler::new(RetryPolicy {
//!     max_retries: 3,
//!     base_delay_ms: 1_000,
//!     max_delay_ms: 10_000,
//! });
//! assert_eq!(retry.record_failure(), RetryDecision::RetryAfter { attempt: 1, delay_ms: 1_000 });
//! assert_eq!(retry.record_failure(), RetryDecision::RetryAfter { attempt: 2, delay_ms: 2_000 });
//! assert_eq!(retry.record_failure(), RetryDecision::GiveUp { attempts: 3 });
//! assert_eq!(retry.attempts(), 0);
//! ```

#[cfg(feature = "http")]
mod http;

use sha2::{Digest, Sha256};
use studysync_core::{BufferConfig, CaptureEvent, SyncRequest};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[cfg(feature = "http")]
pub use http::HttpSyncTransport;

/// Header carrying the batch id on HTTP deliveries.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures after which automatic retrying stops.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound of any delay.
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Extracts the retry knobs of a buffer configuration.
    pub fn from_config(config: &BufferConfig) -> Self {
        Self {
            max_retries: config.retry_max_attempts,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let exponent = attempt - 1;
        let factor = if exponent >= 63 {
            u64::MAX
        } else {
            1_u64 << exponent
        };
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// What to do after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule retry number `attempt` after `delay_ms`.
    RetryAfter {
        /// 1-based retry number.
        attempt: u32,
        /// Backoff delay.
        delay_ms: u64,
    },
    /// Stop retrying on a schedule; the counter has been reset.
    GiveUp {
        /// Attempts counted before giving up.
        attempts: u32,
    },
}

/// Tracks consecutive failures and turns them into backoff decisions.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryScheduler {
    /// Creates a scheduler with no recorded failures.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Backoff parameters.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Consecutive failures since the last success or give-up.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records one failure.
    ///
    /// Each failure increments the counter and schedules the next retry; the
    /// failure that brings the counter to `max_retries` resets it and gives up.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.attempts += 1;
        if self.attempts >= self.policy.max_retries {
            return RetryDecision::GiveUp {
                attempts: self.give_up(),
            };
        }
        RetryDecision::RetryAfter {
            attempt: self.attempts,
            delay_ms: self.policy.delay_for_attempt(self.attempts),
        }
    }

    /// Resets the counter without scheduling, returning the attempts counted.
    pub fn give_up(&mut self) -> u32 {
        std::mem::take(&mut self.attempts)
    }

    /// Records a successful delivery.
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }
}

/// Delivery channel to the sync endpoint.
pub trait SyncTransport: Send + Sync {
    /// Sends one batch and reports whether the backend accepted it.
    ///
    /// # Errors
    /// Returns [`UploadError`] for network failures and non-success responses.
    fn send(&self, request: &SyncRequest) -> Result<(), UploadError>;

    /// Hands one batch to a fire-and-forget channel usable while the host is
    /// shutting down. There is no outcome and no retry.
    fn send_best_effort(&self, request: &SyncRequest);
}

/// Transport used when no endpoint is configured.
///
/// Every send fails as a connection error, so events stay queued and durable
/// until a real transport takes over.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTransport;

impl SyncTransport for OfflineTransport {
    fn send(&self, _request: &SyncRequest) -> Result<(), UploadError> {
        Err(UploadError::Connection(
            "no sync endpoint configured".to_string(),
        ))
    }

    fn send_best_effort(&self, request: &SyncRequest) {
        debug!(batch_id = %request.batch_id, "offline transport dropped best-effort batch");
    }
}

/// Builds the sync request for a queue snapshot.
pub fn sync_request_for(events: Vec<CaptureEvent>, client_timestamp: u64) -> SyncRequest {
    let batch_id = batch_id_for_events(&events);
    SyncRequest {
        events,
        client_timestamp,
        batch_id,
    }
}

/// Derives a stable batch id from the ordered event ids.
///
/// Identical batches always map to the same id, letting the backend treat a
/// re-sent batch as a duplicate.
pub fn batch_id_for_events(events: &[CaptureEvent]) -> String {
    let mut hasher = Sha256::new();
    for event in events {
        hasher.update(event.id.as_bytes());
        hasher.update([0_u8]);
    }
    hex::encode(hasher.finalize())
}

/// Validated sync endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEndpoint {
    url: Url,
}

impl SyncEndpoint {
    /// Parses and validates an endpoint.
    ///
    /// # Errors
    /// Returns [`UploadError::InvalidEndpoint`] for unparsable URLs, schemes
    /// other than `https`, or plain `http` to a non-loopback host.
    pub fn parse(endpoint: &str) -> Result<Self, UploadError> {
        let url = Url::parse(endpoint)
            .map_err(|error| UploadError::InvalidEndpoint(format!("invalid sync url: {error}")))?;

        match url.scheme() {
            "https" => {}
            "http" if is_loopback_host(url.host_str()) => {}
            "http" => {
                return Err(UploadError::InvalidEndpoint(
                    "plain http is only allowed for loopback hosts".to_string(),
                ));
            }
            other => {
                return Err(UploadError::InvalidEndpoint(format!(
                    "unsupported scheme: {other}"
                )));
            }
        }

        Ok(Self { url })
    }

    /// Endpoint as a string.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Parsed endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    matches!(host, Some("localhost" | "127.0.0.1" | "[::1]" | "::1"))
}

/// Failure category used to drive retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient; retrying may succeed.
    Retriable,
    /// Retrying the same batch will not help.
    Permanent,
}

/// Maps an upload error to its retry class.
pub fn classify_upload_error(error: &UploadError) -> FailureClass {
    match error {
        UploadError::Timeout | UploadError::Connection(_) | UploadError::Server(_) => {
            FailureClass::Retriable
        }
        UploadError::Client(408 | 429) => FailureClass::Retriable,
        UploadError::Client(_) | UploadError::InvalidEndpoint(_) | UploadError::Encode(_) => {
            FailureClass::Permanent
        }
        UploadError::Transport(_) => FailureClass::Retriable,
    }
}

/// Delivery errors.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Request timed out.
    #[error("sync request timed out")]
    Timeout,
    /// Endpoint unreachable.
    #[error("sync connection failure: {0}")]
    Connection(String),
    /// Backend returned a 5xx status.
    #[error("sync server error: status {0}")]
    Server(u16),
    /// Backend rejected the request with a 4xx status.
    #[error("sync request rejected: status {0}")]
    Client(u16),
    /// Endpoint URL violates policy.
    #[error("invalid sync endpoint: {0}")]
    InvalidEndpoint(String),
    /// Request body could not be encoded.
    #[error("sync request encoding failure: {0}")]
    Encode(#[from] serde_json::Error),
    /// Any other transport failure.
    #[error("sync transport failure: {0}")]
    Transport(String),
}
