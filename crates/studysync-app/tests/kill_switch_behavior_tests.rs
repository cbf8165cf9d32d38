//! Integration tests for runtime kill-switch behavior.

use std::sync::Arc;

use studysync_app::{
    AppConfig, AppError, build_practice_capture, capture_enabled_from_env,
    capture_enabled_from_value,
};
use studysync_upload::OfflineTransport;

#[test]
fn kill_switch_behavior_tests_disables_capture_when_env_is_false() {
    // Safety:
    // - Integration tests mutate process env in a single-threaded test body.
    // - We reset the variable before returning.
    unsafe { std::env::set_var("STUDYSYNC_CAPTURE_ENABLED", "false") };
    assert!(!capture_enabled_from_env());

    // Safety: see rationale above.
    unsafe { std::env::set_var("STUDYSYNC_CAPTURE_ENABLED", "true") };
    assert!(capture_enabled_from_env());

    // Safety: see rationale above.
    unsafe { std::env::remove_var("STUDYSYNC_CAPTURE_ENABLED") };
    assert!(capture_enabled_from_env());
}

#[test]
fn kill_switch_behavior_tests_value_semantics() {
    assert!(capture_enabled_from_value(None));
    assert!(!capture_enabled_from_value(Some("0")));
    assert!(!capture_enabled_from_value(Some(" False ")));
    assert!(capture_enabled_from_value(Some("yes")));
}

#[test]
fn kill_switch_behavior_tests_blocks_capture_construction() {
    let state_dir = tempfile::tempdir().expect("temp dir");
    let state_path = state_dir.path().to_string_lossy().to_string();
    let config = AppConfig::from_lookup(|key| match key {
        "STUDYSYNC_CAPTURE_ENABLED" => Some("off".to_string()),
        "STUDYSYNC_STATE_DIR" => Some(state_path.clone()),
        _ => None,
    })
    .expect("env should be valid");

    let result = build_practice_capture(&config, Arc::new(OfflineTransport), 0);
    assert!(matches!(result, Err(AppError::CaptureDisabled)));
}
