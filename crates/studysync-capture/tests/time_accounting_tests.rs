//! Property tests for the study time-accounting invariant.

mod common;

use proptest::prelude::*;
use studysync_capture::{InputSignal, ScrollMetrics, StudyCapture, StudyConfig, Visibility};

use common::{RecordingSessionApi, RecordingTransport, quiet_buffer};

#[derive(Debug, Clone, Copy)]
enum Signal {
    Input,
    Hide,
    Show,
    Scroll,
    Poll,
    Peek,
}

fn signal_strategy() -> impl Strategy<Value = Signal> {
    prop_oneof![
        Just(Signal::Input),
        Just(Signal::Hide),
        Just(Signal::Show),
        Just(Signal::Scroll),
        Just(Signal::Poll),
        Just(Signal::Peek),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Active, idle and hidden totals always sum to the elapsed session time.
    #[test]
    fn time_accounting_tests_buckets_sum_to_elapsed(
        start_at in 0_u64..1_000_000,
        steps in prop::collection::vec((signal_strategy(), 0_u64..90_000), 1..60)
    ) {
        let config = StudyConfig {
            idle_timeout_ms: 20_000,
            ..StudyConfig::default()
        };
        let mut study = StudyCapture::new(
            config,
            "material",
            quiet_buffer(RecordingTransport::accepting()),
            RecordingSessionApi::issuing("srv-prop"),
        );
        prop_assert!(study.start(start_at));

        let mut now = start_at;
        for (signal, gap) in steps {
            now += gap;
            match signal {
                Signal::Input => study.on_input(InputSignal::PointerMove, now),
                Signal::Hide => study.on_visibility_change(Visibility::Hidden, now),
                Signal::Show => study.on_visibility_change(Visibility::Visible, now),
                Signal::Scroll => study.on_scroll(
                    ScrollMetrics { scroll_top: gap as f64, scroll_height: 90_000.0, client_height: 500.0 },
                    now,
                ),
                Signal::Poll => study.poll(now),
                Signal::Peek => {
                    let peeked = study.state_at(now + 1);
                    prop_assert_eq!(peeked.accounted_time(), now + 1 - start_at);
                    continue;
                }
            }
            let state = study.state();
            prop_assert_eq!(state.accounted_time(), now - start_at);
        }

        let metrics = study.end(now + 5).expect("session ends");
        prop_assert_eq!(
            metrics.total_active_time + metrics.total_idle_time + metrics.total_hidden_time,
            metrics.duration
        );
    }
}
