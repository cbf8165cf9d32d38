//! Integration tests for the practice session state machine.

mod common;

use studysync_capture::{AnswerOutcome, PracticeCapture};
use studysync_core::EventKind;

use common::{RecordingTransport, queued_kinds, quiet_buffer};

fn payloads(capture: &PracticeCapture, kind: EventKind) -> Vec<serde_json::Value> {
    capture
        .buffer()
        .events()
        .iter()
        .filter(|event| event.kind == kind)
        .map(|event| event.payload.clone())
        .collect()
}

#[test]
fn practice_capture_tests_reviewing_same_question_is_a_no_op() {
    let mut practice = PracticeCapture::new(quiet_buffer(RecordingTransport::accepting()));
    assert!(practice.init_capture("practice-1", 0));
    assert!(practice.capture_question_view("q1", 100));
    assert!(!practice.capture_question_view("q1", 200));

    assert_eq!(
        queued_kinds(practice.buffer()),
        vec![EventKind::SessionStart, EventKind::QuestionView]
    );
}

#[test]
fn practice_capture_tests_navigation_reports_previous_question() {
    let mut practice = PracticeCapture::new(quiet_buffer(RecordingTransport::accepting()));
    practice.init_capture("practice-1", 0);
    practice.capture_question_view("q1", 1_000);
    practice.capture_answer_change("q1", 4_000);
    practice.capture_answer_change("q1", 6_000);
    practice.capture_question_view("q2", 9_000);

    assert_eq!(
        queued_kinds(practice.buffer()),
        vec![
            EventKind::SessionStart,
            EventKind::QuestionView,
            EventKind::AnswerChange,
            EventKind::AnswerChange,
            EventKind::QuestionNavigate,
            EventKind::QuestionView,
        ]
    );
    let navigate = &payloads(&practice, EventKind::QuestionNavigate)[0];
    assert_eq!(navigate["fromQuestionId"], "q1");
    assert_eq!(navigate["toQuestionId"], "q2");
    assert_eq!(navigate["timeSpent"], 8_000);
    assert_eq!(navigate["answerChanges"], 2);

    let changes = payloads(&practice, EventKind::AnswerChange);
    assert_eq!(changes[1]["changeCount"], 2);
    assert_eq!(changes[1]["timeSinceView"], 5_000);
    assert_eq!(practice.current_question(), Some("q2"));
}

#[test]
fn practice_capture_tests_submit_and_skip_reset_change_counter() {
    let mut practice = PracticeCapture::new(quiet_buffer(RecordingTransport::accepting()));
    practice.init_capture("practice-1", 0);
    practice.capture_question_view("q1", 0);
    practice.capture_answer_change("q1", 1_000);
    practice.capture_answer_submit("q1", AnswerOutcome::Correct, 2_000);
    practice.capture_answer_change("q1", 3_000);

    let submit = &payloads(&practice, EventKind::AnswerSubmit)[0];
    assert_eq!(submit["outcome"], "correct");
    assert_eq!(submit["changeCount"], 1);
    assert_eq!(submit["timeSpent"], 2_000);
    assert_eq!(payloads(&practice, EventKind::AnswerChange)[1]["changeCount"], 1);

    practice.capture_question_view("q2", 4_000);
    practice.capture_answer_skip("q2", 5_000);
    let skip = &payloads(&practice, EventKind::AnswerSkip)[0];
    assert_eq!(skip["questionId"], "q2");
    assert_eq!(skip["changeCount"], 0);
}

#[test]
fn practice_capture_tests_completion_flushes_and_clears_context() {
    let transport = RecordingTransport::accepting();
    let mut practice = PracticeCapture::new(quiet_buffer(transport.clone()));
    practice.init_capture("practice-1", 1_000);
    practice.capture_question_view("q1", 1_000);
    practice.capture_answer_submit("q1", AnswerOutcome::Incorrect, 2_000);
    practice.capture_question_view("q2", 3_000);
    practice.capture_answer_submit("q2", AnswerOutcome::Correct, 4_000);

    let summary = practice
        .capture_session_complete(11_000)
        .expect("context was initialized");
    assert_eq!(summary.questions_viewed, 2);
    assert_eq!(summary.answers_submitted, 2);
    assert_eq!(summary.correct_answers, 1);
    assert_eq!(summary.duration, 10_000);

    assert!(practice.buffer().is_empty());
    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 7);
    assert_eq!(delivered[6].kind, EventKind::SessionComplete);
    assert_eq!(delivered[6].payload["correctAnswers"], 1);
    assert_eq!(practice.session_id(), None);

    assert!(practice.init_capture("practice-2", 20_000));
    assert_eq!(practice.session_id(), Some("practice-2"));
}

#[test]
fn practice_capture_tests_calls_without_context_are_ignored() {
    let mut practice = PracticeCapture::new(quiet_buffer(RecordingTransport::accepting()));
    assert!(!practice.capture_question_view("q1", 0));
    practice.capture_answer_change("q1", 1);
    practice.capture_answer_submit("q1", AnswerOutcome::Ungraded, 2);
    practice.capture_answer_skip("q1", 3);
    assert!(practice.capture_session_complete(4).is_none());

    assert!(practice.buffer().is_empty());
}

#[test]
fn practice_capture_tests_init_is_idempotent_per_session_id() {
    let mut practice = PracticeCapture::new(quiet_buffer(RecordingTransport::accepting()));
    assert!(practice.init_capture("practice-1", 0));
    practice.capture_question_view("q1", 10);
    assert!(!practice.init_capture("practice-1", 20));
    assert_eq!(practice.current_question(), Some("q1"));

    assert!(practice.init_capture("practice-2", 30));
    assert_eq!(practice.current_question(), None);
    assert_eq!(
        queued_kinds(practice.buffer())
            .iter()
            .filter(|kind| **kind == EventKind::SessionStart)
            .count(),
        2
    );
}
