//! Blocking HTTP client for the session lifecycle endpoints.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::api::{
    CreateSessionRequest, CreateSessionResponse, SessionApi, SessionApiError, SessionEndpoints,
    StudyMetrics,
};

/// Creates and finalizes session records over HTTP.
///
/// Best-effort updates run on a detached thread and their outcome is ignored.
#[derive(Debug, Clone)]
pub struct HttpSessionApi {
    endpoints: SessionEndpoints,
    client: Client,
}

impl HttpSessionApi {
    /// Builds a client with a per-request timeout.
    ///
    /// # Errors
    /// Returns [`SessionApiError::Unavailable`] when the HTTP client cannot be
    /// built.
    pub fn new(endpoints: SessionEndpoints, timeout: Duration) -> Result<Self, SessionApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| SessionApiError::Unavailable(error.to_string()))?;
        Ok(Self { endpoints, client })
    }

    /// Session resource URLs.
    pub fn endpoints(&self) -> &SessionEndpoints {
        &self.endpoints
    }
}

impl SessionApi for HttpSessionApi {
    fn create_session(&self, request: &CreateSessionRequest) -> Result<String, SessionApiError> {
        let response = self
            .client
            .post(self.endpoints.create_url()?)
            .json(request)
            .send()
            .map_err(unavailable)?;

        let status = response.status();
        debug!(status = status.as_u16(), "create session response");
        if !status.is_success() {
            return Err(SessionApiError::Rejected(status.as_u16()));
        }
        let body = response.bytes().map_err(unavailable)?;
        CreateSessionResponse::parse(&body)
    }

    fn update_session(
        &self,
        session_id: &str,
        metrics: &StudyMetrics,
    ) -> Result<(), SessionApiError> {
        let response = self
            .client
            .patch(self.endpoints.update_url(session_id)?)
            .json(metrics)
            .send()
            .map_err(unavailable)?;

        let status = response.status();
        debug!(session_id, status = status.as_u16(), "update session response");
        if status.is_success() {
            Ok(())
        } else {
            Err(SessionApiError::Rejected(status.as_u16()))
        }
    }

    fn update_session_best_effort(&self, session_id: &str, metrics: &StudyMetrics) {
        let url = match self.endpoints.update_url(session_id) {
            Ok(url) => url,
            Err(error) => {
                warn!(session_id, %error, "best-effort session update not addressable");
                return;
            }
        };
        let client = self.client.clone();
        let metrics = metrics.clone();

        let spawned = std::thread::Builder::new()
            .name("studysync-session-beacon".to_string())
            .spawn(move || {
                let _ = client.patch(url).json(&metrics).send();
            });
        if let Err(error) = spawned {
            warn!(session_id, %error, "failed to spawn best-effort session update");
        }
    }
}

fn unavailable(error: reqwest::Error) -> SessionApiError {
    SessionApiError::Unavailable(error.to_string())
}
