//! Integration tests for backoff scheduling and give-up behavior.

use studysync_core::BufferConfig;
use studysync_upload::{RetryDecision, RetryPolicy, RetryScheduler};

#[test]
fn retry_policy_tests_default_config_doubles_until_give_up() {
    let mut retry = RetryScheduler::new(RetryPolicy::from_config(&BufferConfig::default()));

    let delays: Vec<u64> = (0..4)
        .map(|_| match retry.record_failure() {
            RetryDecision::RetryAfter { delay_ms, .. } => delay_ms,
            RetryDecision::GiveUp { .. } => panic!("should still be retrying"),
        })
        .collect();
    assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000]);
    assert_eq!(retry.attempts(), 4);

    assert_eq!(retry.record_failure(), RetryDecision::GiveUp { attempts: 5 });
    assert_eq!(retry.attempts(), 0);
}

#[test]
fn retry_policy_tests_delay_formula_caps_at_max() {
    let policy = RetryPolicy::from_config(&BufferConfig::default());
    let delays: Vec<u64> = (1..=8).map(|attempt| policy.delay_for_attempt(attempt)).collect();
    assert_eq!(
        delays,
        vec![2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 120_000, 120_000]
    );
}

#[test]
fn retry_policy_tests_fresh_cycle_after_give_up() {
    let mut retry = RetryScheduler::new(RetryPolicy {
        max_retries: 2,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
    });
    retry.record_failure();
    assert_eq!(retry.record_failure(), RetryDecision::GiveUp { attempts: 2 });
    assert_eq!(
        retry.record_failure(),
        RetryDecision::RetryAfter {
            attempt: 1,
            delay_ms: 100
        }
    );
}

#[test]
fn retry_policy_tests_success_resets_counter() {
    let mut retry = RetryScheduler::new(RetryPolicy {
        max_retries: 3,
        base_delay_ms: 100,
        max_delay_ms: 1_000,
    });
    retry.record_failure();
    retry.record_failure();
    retry.record_success();

    assert_eq!(
        retry.record_failure(),
        RetryDecision::RetryAfter {
            attempt: 1,
            delay_ms: 100
        }
    );
}
