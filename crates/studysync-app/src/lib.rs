#![warn(missing_docs)]
//! # studysync-app
//!
//! ## Purpose
//! Wires the `studysync` crates into a runnable host: configuration from the
//! environment, logging bootstrap, durable storage, transport selection and
//! capture construction.
//!
//! ## Responsibilities
//! - Load and validate [`AppConfig`] from `STUDYSYNC_*` variables.
//! - Honor the capture kill switch.
//! - Open the file-backed pending-event slot.
//! - Pick the sync transport and session API for the configured endpoints.
//! - Build event buffers and capture state machines from one config.
//! - Project sync status into a flat runtime snapshot.
//!
//! ## Data flow
//! Environment -> [`AppConfig`] -> store + transport + session API ->
//! [`EventBuffer`] -> [`StudyCapture`] / [`PracticeCapture`] ->
//! [`project_runtime_status`].
//!
//! ## Ownership and lifetimes
//! Builders hand out owned captures; the host keeps them for the lifetime of
//! a page or session and drives them with `poll(now)`.
//!
//! ## Error model
//! Setup failures are wrapped in [`AppError`]. Once running, capture and sync
//! never fail outward.
//!
//! ## Security and privacy notes
//! - Plain-http endpoints are rejected unless they target a loopback host.
//! - The kill switch stops capture construction without code changes.

use std::path::PathBuf;
use std::sync::Arc;

use studysync_buffer::{BufferError, EventBuffer};
use studysync_capture::{
    OfflineSessionApi, PracticeCapture, SessionApi, SessionApiError, SessionEndpoints,
    StudyCapture, StudyConfig,
};
use studysync_core::{BufferConfig, SyncStatus};
use studysync_store::{FileStore, PersistenceStore, StoreError};
use studysync_ui::project_sync_status;
use studysync_upload::{OfflineTransport, SyncEndpoint, SyncTransport, UploadError};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("STUDYSYNC_VERSION");

/// Sync endpoint URL.
pub const ENV_SYNC_ENDPOINT: &str = "STUDYSYNC_SYNC_ENDPOINT";
/// Base URL of the session lifecycle endpoints.
pub const ENV_SESSION_ENDPOINT: &str = "STUDYSYNC_SESSION_ENDPOINT";
/// Directory of the durable pending-event slot.
pub const ENV_STATE_DIR: &str = "STUDYSYNC_STATE_DIR";
/// Queue length that triggers a flush.
pub const ENV_MAX_BATCH: &str = "STUDYSYNC_MAX_BATCH";
/// Period of the background flush.
pub const ENV_FLUSH_INTERVAL_MS: &str = "STUDYSYNC_FLUSH_INTERVAL_MS";
/// Study idle timeout.
pub const ENV_IDLE_TIMEOUT_MS: &str = "STUDYSYNC_IDLE_TIMEOUT_MS";
/// Capture kill switch.
pub const ENV_CAPTURE_ENABLED: &str = "STUDYSYNC_CAPTURE_ENABLED";

/// Filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "studysync=info";

const DEFAULT_STATE_DIR: &str = ".studysync";
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Validated sync endpoint; `None` keeps events queued offline.
    pub sync_endpoint: Option<SyncEndpoint>,
    /// Validated session API base; `None` gives every session a local id.
    pub session_endpoint: Option<SessionEndpoints>,
    /// Directory of the durable slot.
    pub state_dir: PathBuf,
    /// Buffer tuning.
    pub buffer: BufferConfig,
    /// Study capture timing.
    pub study: StudyConfig,
    /// Kill-switch state.
    pub capture_enabled: bool,
}

impl AppConfig {
    /// Reads configuration from the process environment.
    ///
    /// # Errors
    /// Returns [`AppError::Config`] for unparsable or out-of-range values and
    /// [`AppError::Upload`] for an endpoint that violates transport policy.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    /// Same as [`AppConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let sync_endpoint = value(ENV_SYNC_ENDPOINT)
            .map(|raw| SyncEndpoint::parse(&raw))
            .transpose()?;
        let session_endpoint = value(ENV_SESSION_ENDPOINT)
            .map(|raw| SyncEndpoint::parse(&raw).map(SessionEndpoints::new))
            .transpose()?;
        let state_dir = value(ENV_STATE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));

        let mut buffer = BufferConfig::default();
        if let Some(raw) = value(ENV_MAX_BATCH) {
            buffer.max_size = parse_positive(ENV_MAX_BATCH, &raw)?;
        }
        if let Some(raw) = value(ENV_FLUSH_INTERVAL_MS) {
            buffer.flush_interval_ms = parse_positive(ENV_FLUSH_INTERVAL_MS, &raw)?;
        }
        buffer
            .validate()
            .map_err(|error| AppError::Config(error.to_string()))?;

        let mut study = StudyConfig::default();
        if let Some(raw) = value(ENV_IDLE_TIMEOUT_MS) {
            study.idle_timeout_ms = parse_positive(ENV_IDLE_TIMEOUT_MS, &raw)?;
        }

        Ok(Self {
            sync_endpoint,
            session_endpoint,
            state_dir,
            buffer,
            study,
            capture_enabled: capture_enabled_from_value(value(ENV_CAPTURE_ENABLED).as_deref()),
        })
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(AppError::Config(format!(
            "{key} must be a positive integer, got {raw:?}"
        ))),
    }
}

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Interprets a kill-switch value.
///
/// Semantics:
/// - Unset => capture enabled.
/// - `0`, `false`, `off` (case-insensitive) => capture disabled.
/// - Any other value => capture enabled.
pub fn capture_enabled_from_value(value: Option<&str>) -> bool {
    match value {
        Some(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            !(normalized == "0" || normalized == "false" || normalized == "off")
        }
        None => true,
    }
}

/// Checks the runtime kill-switch env var.
pub fn capture_enabled_from_env() -> bool {
    capture_enabled_from_value(std::env::var(ENV_CAPTURE_ENABLED).ok().as_deref())
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` directives are honored; [`DEFAULT_LOG_FILTER`] applies when it
/// is unset.
///
/// # Errors
/// Returns [`AppError::Logging`] when a global subscriber is already set.
pub fn init_logging() -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| AppError::Logging(error.to_string()))
}

/// Opens the file-backed pending-event slot under `config.state_dir`.
///
/// # Errors
/// Returns [`AppError::Store`] when the directory cannot be created.
pub fn open_pending_store(config: &AppConfig) -> Result<PersistenceStore, AppError> {
    let backend = FileStore::open(&config.state_dir)?;
    Ok(PersistenceStore::new(Arc::new(backend)))
}

/// Picks the transport for the configured endpoint.
///
/// Without an endpoint, or without the `http` feature, events stay queued
/// through [`OfflineTransport`].
///
/// # Errors
/// Returns [`AppError::Upload`] when the HTTP client cannot be built.
pub fn transport_for(config: &AppConfig) -> Result<Arc<dyn SyncTransport>, AppError> {
    let Some(endpoint) = &config.sync_endpoint else {
        info!("no sync endpoint configured, events stay queued");
        return Ok(Arc::new(OfflineTransport));
    };
    http_transport(endpoint)
}

#[cfg(feature = "http")]
fn http_transport(endpoint: &SyncEndpoint) -> Result<Arc<dyn SyncTransport>, AppError> {
    let transport = studysync_upload::HttpSyncTransport::new(endpoint.clone(), HTTP_TIMEOUT)?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "http"))]
fn http_transport(endpoint: &SyncEndpoint) -> Result<Arc<dyn SyncTransport>, AppError> {
    warn!(
        endpoint = endpoint.as_str(),
        "built without the http feature, events stay queued"
    );
    Ok(Arc::new(OfflineTransport))
}

/// Picks the session API for the configured session endpoint.
///
/// Without an endpoint, or without the `http` feature, sessions fall back to
/// local ids through [`OfflineSessionApi`].
///
/// # Errors
/// Returns [`AppError::Session`] when the HTTP client cannot be built.
pub fn session_api_for(config: &AppConfig) -> Result<Arc<dyn SessionApi>, AppError> {
    let Some(endpoints) = &config.session_endpoint else {
        info!("no session endpoint configured, sessions use local ids");
        return Ok(Arc::new(OfflineSessionApi));
    };
    http_session_api(endpoints)
}

#[cfg(feature = "http")]
fn http_session_api(endpoints: &SessionEndpoints) -> Result<Arc<dyn SessionApi>, AppError> {
    let api = studysync_capture::HttpSessionApi::new(endpoints.clone(), HTTP_TIMEOUT)?;
    Ok(Arc::new(api))
}

#[cfg(not(feature = "http"))]
fn http_session_api(endpoints: &SessionEndpoints) -> Result<Arc<dyn SessionApi>, AppError> {
    warn!(
        endpoint = endpoints.base().as_str(),
        "built without the http feature, sessions use local ids"
    );
    Ok(Arc::new(OfflineSessionApi))
}

/// Builds an event buffer over the file-backed slot.
///
/// # Errors
/// Returns [`AppError::Store`] or [`AppError::Buffer`] on setup failure.
pub fn build_buffer(
    config: &AppConfig,
    transport: Arc<dyn SyncTransport>,
    now_ms: u64,
) -> Result<EventBuffer, AppError> {
    let store = open_pending_store(config)?;
    Ok(EventBuffer::new(config.buffer, store, transport, now_ms)?)
}

/// Builds a study capture with its own buffer.
///
/// # Errors
/// Returns [`AppError::CaptureDisabled`] when the kill switch is off, and
/// buffer setup errors otherwise.
pub fn build_study_capture(
    config: &AppConfig,
    material_ref: &str,
    transport: Arc<dyn SyncTransport>,
    api: Arc<dyn SessionApi>,
    now_ms: u64,
) -> Result<StudyCapture, AppError> {
    ensure_capture_enabled(config)?;
    let buffer = build_buffer(config, transport, now_ms)?;
    Ok(StudyCapture::new(config.study, material_ref, buffer, api))
}

/// Builds a practice capture with its own buffer.
///
/// # Errors
/// Same as [`build_study_capture`].
pub fn build_practice_capture(
    config: &AppConfig,
    transport: Arc<dyn SyncTransport>,
    now_ms: u64,
) -> Result<PracticeCapture, AppError> {
    ensure_capture_enabled(config)?;
    let buffer = build_buffer(config, transport, now_ms)?;
    Ok(PracticeCapture::new(buffer))
}

fn ensure_capture_enabled(config: &AppConfig) -> Result<(), AppError> {
    if config.capture_enabled {
        Ok(())
    } else {
        warn!("capture disabled by {ENV_CAPTURE_ENABLED}");
        Err(AppError::CaptureDisabled)
    }
}

/// Consolidated runtime status snapshot for simple UI projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStatus {
    /// Whether the kill switch currently allows capture.
    pub capture_allowed: bool,
    /// Whether events leave the device (an endpoint is configured).
    pub online: bool,
    /// Sync stage as a short name.
    pub sync: String,
    /// Human-readable sync status line.
    pub sync_label: String,
    /// Events waiting for delivery.
    pub queued_events: usize,
}

/// Projects configuration and a sync snapshot into a flat runtime status.
pub fn project_runtime_status(config: &AppConfig, status: &SyncStatus, now_ms: u64) -> RuntimeStatus {
    let projected = project_sync_status(status, now_ms);
    RuntimeStatus {
        capture_allowed: config.capture_enabled,
        online: config.sync_endpoint.is_some(),
        sync: format!("{:?}", projected.stage),
        sync_label: projected.label,
        queued_events: status.queued_events,
    }
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
    /// Durable storage could not be opened.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    /// Event buffer rejected its setup.
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
    /// Sync endpoint or transport setup failed.
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),
    /// Session API setup failed.
    #[error("session api error: {0}")]
    Session(#[from] SessionApiError),
    /// Logging subscriber could not be installed.
    #[error("logging error: {0}")]
    Logging(String),
    /// Capture is switched off.
    #[error("capture disabled by STUDYSYNC_CAPTURE_ENABLED")]
    CaptureDisabled,
}

#[cfg(test)]
mod tests {
    //! Unit tests for value parsing.

    use super::*;

    #[test]
    fn positive_values_only() {
        assert_eq!(parse_positive::<u64>("K", "15").expect("valid"), 15);
        assert!(parse_positive::<u64>("K", "0").is_err());
        assert!(parse_positive::<usize>("K", "-3").is_err());
        assert!(parse_positive::<usize>("K", "ten").is_err());
    }
}
