//! Session lifecycle endpoints consumed by the study capture.

use serde::{Deserialize, Serialize};
use studysync_upload::SyncEndpoint;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Prefix reserved for session ids generated on the client.
pub const LOCAL_SESSION_PREFIX: &str = "local-";

/// Returns `true` for ids minted locally after session creation failed.
pub fn is_local_session_id(session_id: &str) -> bool {
    session_id.starts_with(LOCAL_SESSION_PREFIX)
}

/// Body of the create-session call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Study material the session is about.
    pub material_ref: String,
    /// Client time the start was requested.
    pub started_at: u64,
}

/// Body returned by the create-session call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// Server-issued session id.
    #[serde(alias = "sessionId")]
    pub id: String,
}

impl CreateSessionResponse {
    /// Parses a create-session response body.
    ///
    /// # Errors
    /// Returns [`SessionApiError::InvalidResponse`] for malformed bodies, empty
    /// ids and ids inside the reserved local namespace.
    pub fn parse(body: &[u8]) -> Result<String, SessionApiError> {
        let response: Self = serde_json::from_slice(body)
            .map_err(|error| SessionApiError::InvalidResponse(error.to_string()))?;
        let id = response.id.trim();
        if id.is_empty() {
            return Err(SessionApiError::InvalidResponse(
                "empty session id".to_string(),
            ));
        }
        if is_local_session_id(id) {
            return Err(SessionApiError::InvalidResponse(format!(
                "server id {id:?} uses the reserved {LOCAL_SESSION_PREFIX:?} prefix"
            )));
        }
        Ok(id.to_string())
    }
}

/// Resource URLs of the session lifecycle endpoints.
///
/// Sessions are created with `POST {base}/sessions` and finalized with
/// `PATCH {base}/sessions/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoints {
    base: SyncEndpoint,
}

impl SessionEndpoints {
    /// Wraps a validated base endpoint.
    pub fn new(base: SyncEndpoint) -> Self {
        Self { base }
    }

    /// Base endpoint.
    pub fn base(&self) -> &SyncEndpoint {
        &self.base
    }

    /// URL of the create-session call.
    ///
    /// # Errors
    /// Returns [`SessionApiError::InvalidEndpoint`] when the base URL cannot
    /// carry path segments.
    pub fn create_url(&self) -> Result<Url, SessionApiError> {
        self.with_segments(&[])
    }

    /// URL of the update call for `session_id`, percent-encoded as one segment.
    ///
    /// # Errors
    /// Same as [`SessionEndpoints::create_url`].
    pub fn update_url(&self, session_id: &str) -> Result<Url, SessionApiError> {
        self.with_segments(&[session_id])
    }

    fn with_segments(&self, extra: &[&str]) -> Result<Url, SessionApiError> {
        let mut url = self.base.url().clone();
        url.path_segments_mut()
            .map_err(|()| SessionApiError::InvalidEndpoint(self.base.as_str().to_string()))?
            .pop_if_empty()
            .push("sessions")
            .extend(extra);
        Ok(url)
    }
}

/// Final aggregate metrics of one study session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyMetrics {
    /// Milliseconds visible and active.
    pub total_active_time: u64,
    /// Milliseconds visible and idle.
    pub total_idle_time: u64,
    /// Milliseconds hidden.
    pub total_hidden_time: u64,
    /// Deepest scroll position, in percent.
    pub max_scroll_depth: u8,
    /// Mean of the debounced scroll measurements, in percent.
    pub avg_scroll_depth: u8,
    /// Debounced scroll measurements taken.
    pub scroll_events: u32,
    /// Visibility flips.
    pub visibility_changes: u32,
    /// Wall-clock duration from start to end.
    pub duration: u64,
}

/// Server-side session record operations.
pub trait SessionApi: Send + Sync {
    /// Creates a session record and returns its id.
    ///
    /// # Errors
    /// Returns [`SessionApiError`] when the record cannot be created.
    fn create_session(&self, request: &CreateSessionRequest) -> Result<String, SessionApiError>;

    /// Writes final metrics to an existing session record.
    ///
    /// # Errors
    /// Returns [`SessionApiError`] when the update is not accepted.
    fn update_session(&self, session_id: &str, metrics: &StudyMetrics)
    -> Result<(), SessionApiError>;

    /// Fire-and-forget variant of [`SessionApi::update_session`].
    fn update_session_best_effort(&self, session_id: &str, metrics: &StudyMetrics);
}

/// API used when no backend is reachable; every session falls back to a
/// local id.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineSessionApi;

impl SessionApi for OfflineSessionApi {
    fn create_session(&self, _request: &CreateSessionRequest) -> Result<String, SessionApiError> {
        Err(SessionApiError::Unavailable(
            "no session endpoint configured".to_string(),
        ))
    }

    fn update_session(
        &self,
        _session_id: &str,
        _metrics: &StudyMetrics,
    ) -> Result<(), SessionApiError> {
        Err(SessionApiError::Unavailable(
            "no session endpoint configured".to_string(),
        ))
    }

    fn update_session_best_effort(&self, session_id: &str, _metrics: &StudyMetrics) {
        debug!(session_id, "offline session api dropped best-effort update");
    }
}

/// Session lifecycle errors.
#[derive(Debug, Error)]
pub enum SessionApiError {
    /// Endpoint unreachable or not configured.
    #[error("session api unavailable: {0}")]
    Unavailable(String),
    /// Endpoint answered with a non-success status.
    #[error("session api rejected request: status {0}")]
    Rejected(u16),
    /// Endpoint answered with an unusable body.
    #[error("session api returned an invalid response: {0}")]
    InvalidResponse(String),
    /// Endpoint URL cannot address session resources.
    #[error("invalid session endpoint: {0}")]
    InvalidEndpoint(String),
}
