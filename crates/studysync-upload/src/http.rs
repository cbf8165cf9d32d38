//! Blocking HTTP transport for the sync endpoint.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use studysync_core::SyncRequest;
use tracing::{debug, warn};

use crate::{IDEMPOTENCY_KEY_HEADER, SyncEndpoint, SyncTransport, UploadError};

/// Posts batches as JSON to a [`SyncEndpoint`].
///
/// Best-effort sends run on a detached thread and their outcome is ignored.
#[derive(Debug, Clone)]
pub struct HttpSyncTransport {
    endpoint: SyncEndpoint,
    client: Client,
}

impl HttpSyncTransport {
    /// Builds a transport with a per-request timeout.
    ///
    /// # Errors
    /// Returns [`UploadError::Transport`] when the HTTP client cannot be built.
    pub fn new(endpoint: SyncEndpoint, timeout: Duration) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| UploadError::Transport(error.to_string()))?;
        Ok(Self { endpoint, client })
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &SyncEndpoint {
        &self.endpoint
    }
}

impl SyncTransport for HttpSyncTransport {
    fn send(&self, request: &SyncRequest) -> Result<(), UploadError> {
        let response = self
            .client
            .post(self.endpoint.as_str())
            .header(IDEMPOTENCY_KEY_HEADER, request.batch_id.as_str())
            .json(request)
            .send()
            .map_err(map_reqwest_error)?;

        let status = response.status();
        debug!(batch_id = %request.batch_id, status = status.as_u16(), "sync response");
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(UploadError::Server(status.as_u16()))
        } else {
            Err(UploadError::Client(status.as_u16()))
        }
    }

    fn send_best_effort(&self, request: &SyncRequest) {
        let body = match request.to_json_bytes() {
            Ok(body) => body,
            Err(error) => {
                warn!(batch_id = %request.batch_id, %error, "best-effort batch not encodable");
                return;
            }
        };
        let client = self.client.clone();
        let url = self.endpoint.as_str().to_string();
        let batch_id = request.batch_id.clone();

        let spawned = std::thread::Builder::new()
            .name("studysync-beacon".to_string())
            .spawn(move || {
                let _ = client
                    .post(url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(IDEMPOTENCY_KEY_HEADER, batch_id)
                    .body(body)
                    .send();
            });
        if let Err(error) = spawned {
            warn!(batch_id = %request.batch_id, %error, "failed to spawn best-effort sender");
        }
    }
}

fn map_reqwest_error(error: reqwest::Error) -> UploadError {
    if error.is_timeout() {
        UploadError::Timeout
    } else if error.is_connect() {
        UploadError::Connection(error.to_string())
    } else {
        UploadError::Transport(error.to_string())
    }
}
