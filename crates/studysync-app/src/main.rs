#![warn(missing_docs)]
//! # studysync-app binary
//!
//! Reports the pending queue of the local state directory and, when an
//! endpoint is configured, attempts one delivery before exiting.

use std::process::ExitCode;

use studysync_app::{
    AppConfig, AppError, app_version, build_buffer, init_logging, project_runtime_status,
    transport_for,
};
use studysync_buffer::FlushOutcome;
use studysync_core::unix_time_ms;
use tracing::{error, info};

/// CLI entry point.
fn main() -> ExitCode {
    if let Err(error) = init_logging() {
        eprintln!("failed to initialize logging: {error}");
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "studysync failed");
            eprintln!("studysync: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let now = unix_time_ms();
    info!(
        version = app_version(),
        state_dir = %config.state_dir.display(),
        online = config.sync_endpoint.is_some(),
        sessions_online = config.session_endpoint.is_some(),
        "studysync starting"
    );

    let transport = transport_for(&config)?;
    let mut buffer = build_buffer(&config, transport, now)?;

    println!("studysync {}", app_version());
    println!(
        "capture_enabled={} (STUDYSYNC_CAPTURE_ENABLED)",
        config.capture_enabled
    );
    println!("pending_events={}", buffer.len());

    if config.sync_endpoint.is_some() && !buffer.is_empty() {
        match buffer.force_flush(unix_time_ms()) {
            FlushOutcome::Delivered { events } => println!("delivered_events={events}"),
            FlushOutcome::Failed { class, .. } => println!("delivery_failed={class:?}"),
            FlushOutcome::Skipped => println!("delivery_skipped"),
        }
    }

    let finished_at = unix_time_ms();
    buffer.shutdown(finished_at);
    let status = project_runtime_status(&config, buffer.status(), finished_at);
    println!("sync={} ({})", status.sync, status.sync_label);
    Ok(())
}
