//! Practice session capture tied to question navigation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use studysync_buffer::EventBuffer;
use studysync_core::{EventKind, NewEvent};
use tracing::{debug, info, warn};

/// Result of a submitted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerOutcome {
    /// Graded as correct.
    Correct,
    /// Graded as incorrect.
    Incorrect,
    /// Not graded on the client.
    Ungraded,
}

impl AnswerOutcome {
    /// Wire name used in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::Incorrect => "incorrect",
            Self::Ungraded => "ungraded",
        }
    }
}

/// Aggregate emitted with the completion event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSummary {
    /// Distinct question views (re-views of the current question excluded).
    pub questions_viewed: u32,
    /// Submitted answers.
    pub answers_submitted: u32,
    /// Skipped questions.
    pub answers_skipped: u32,
    /// Submissions graded correct.
    pub correct_answers: u32,
    /// Answer edits across all questions.
    pub answer_changes: u32,
    /// Time from initialization to completion.
    pub duration: u64,
}

#[derive(Debug, Clone, Default)]
struct QuestionProgress {
    viewed_at: u64,
    change_count: u32,
}

#[derive(Debug)]
struct PracticeContext {
    session_id: String,
    started_at: u64,
    current: Option<String>,
    questions: HashMap<String, QuestionProgress>,
    summary: PracticeSummary,
}

impl PracticeContext {
    fn progress(&mut self, question_id: &str, now_ms: u64) -> &mut QuestionProgress {
        self.questions
            .entry(question_id.to_string())
            .or_insert_with(|| QuestionProgress {
                viewed_at: now_ms,
                change_count: 0,
            })
    }
}

/// Practice session state machine owning its event buffer.
pub struct PracticeCapture {
    buffer: EventBuffer,
    context: Option<PracticeContext>,
}

impl PracticeCapture {
    /// Creates a capture with no session context.
    pub fn new(buffer: EventBuffer) -> Self {
        Self {
            buffer,
            context: None,
        }
    }

    /// Initializes the context for `session_id` and emits the start event.
    ///
    /// Re-initializing the current session is a no-op returning `false`; a
    /// different id replaces the previous context.
    pub fn init_capture(&mut self, session_id: &str, now_ms: u64) -> bool {
        if let Some(context) = &self.context {
            if context.session_id == session_id {
                return false;
            }
            info!(
                previous = %context.session_id,
                next = session_id,
                "replacing practice session context"
            );
        }

        self.context = Some(PracticeContext {
            session_id: session_id.to_string(),
            started_at: now_ms,
            current: None,
            questions: HashMap::new(),
            summary: PracticeSummary::default(),
        });
        emit(
            &mut self.buffer,
            EventKind::SessionStart,
            session_id,
            json!({ "sessionId": session_id }),
            now_ms,
        );
        true
    }

    /// Records that `question_id` is shown.
    ///
    /// Re-viewing the current question is a no-op returning `false`. Moving
    /// from another question first emits a navigation event for it.
    pub fn capture_question_view(&mut self, question_id: &str, now_ms: u64) -> bool {
        let Some(context) = self.context.as_mut() else {
            warn!(question_id, "question view without practice context");
            return false;
        };
        if context.current.as_deref() == Some(question_id) {
            return false;
        }

        if let Some(previous) = context.current.take() {
            let progress = context.progress(&previous, now_ms).clone();
            emit(
                &mut self.buffer,
                EventKind::QuestionNavigate,
                &context.session_id,
                json!({
                    "fromQuestionId": previous,
                    "toQuestionId": question_id,
                    "timeSpent": now_ms.saturating_sub(progress.viewed_at),
                    "answerChanges": progress.change_count,
                }),
                now_ms,
            );
        }

        let progress = context.progress(question_id, now_ms);
        progress.viewed_at = now_ms;
        context.current = Some(question_id.to_string());
        context.summary.questions_viewed += 1;
        let view_index = context.summary.questions_viewed;
        emit(
            &mut self.buffer,
            EventKind::QuestionView,
            &context.session_id,
            json!({ "questionId": question_id, "viewIndex": view_index }),
            now_ms,
        );
        true
    }

    /// Records one edit of the answer to `question_id`.
    pub fn capture_answer_change(&mut self, question_id: &str, now_ms: u64) {
        let Some(context) = self.context.as_mut() else {
            warn!(question_id, "answer change without practice context");
            return;
        };
        let progress = context.progress(question_id, now_ms);
        progress.change_count += 1;
        let change_count = progress.change_count;
        let since_view = now_ms.saturating_sub(progress.viewed_at);
        context.summary.answer_changes += 1;

        emit(
            &mut self.buffer,
            EventKind::AnswerChange,
            &context.session_id,
            json!({
                "questionId": question_id,
                "changeCount": change_count,
                "timeSinceView": since_view,
            }),
            now_ms,
        );
    }

    /// Records a submitted answer and resets its change counter.
    pub fn capture_answer_submit(&mut self, question_id: &str, outcome: AnswerOutcome, now_ms: u64) {
        let Some(context) = self.context.as_mut() else {
            warn!(question_id, "answer submit without practice context");
            return;
        };
        let progress = context.progress(question_id, now_ms);
        let change_count = std::mem::take(&mut progress.change_count);
        let time_spent = now_ms.saturating_sub(progress.viewed_at);
        context.summary.answers_submitted += 1;
        if outcome == AnswerOutcome::Correct {
            context.summary.correct_answers += 1;
        }

        emit(
            &mut self.buffer,
            EventKind::AnswerSubmit,
            &context.session_id,
            json!({
                "questionId": question_id,
                "outcome": outcome.as_str(),
                "changeCount": change_count,
                "timeSpent": time_spent,
            }),
            now_ms,
        );
    }

    /// Records a skipped question and resets its change counter.
    pub fn capture_answer_skip(&mut self, question_id: &str, now_ms: u64) {
        let Some(context) = self.context.as_mut() else {
            warn!(question_id, "answer skip without practice context");
            return;
        };
        let progress = context.progress(question_id, now_ms);
        let change_count = std::mem::take(&mut progress.change_count);
        let time_spent = now_ms.saturating_sub(progress.viewed_at);
        context.summary.answers_skipped += 1;

        emit(
            &mut self.buffer,
            EventKind::AnswerSkip,
            &context.session_id,
            json!({
                "questionId": question_id,
                "changeCount": change_count,
                "timeSpent": time_spent,
            }),
            now_ms,
        );
    }

    /// Emits the summary, force-flushes and clears the context.
    pub fn capture_session_complete(&mut self, now_ms: u64) -> Option<PracticeSummary> {
        let Some(mut context) = self.context.take() else {
            warn!("session complete without practice context");
            return None;
        };
        context.summary.duration = now_ms.saturating_sub(context.started_at);

        match NewEvent::with_payload(
            EventKind::SessionComplete,
            context.session_id.clone(),
            &context.summary,
        ) {
            Ok(event) => {
                self.buffer.push(event, now_ms);
            }
            Err(error) => warn!(%error, "failed to encode practice summary"),
        }
        self.buffer.force_flush(now_ms);
        debug!(session_id = %context.session_id, "practice session completed");
        Some(context.summary)
    }

    /// Polls the owned buffer.
    pub fn poll(&mut self, now_ms: u64) {
        self.buffer.poll(now_ms);
    }

    /// Hands the queue to the buffer's unload path.
    pub fn on_page_unload(&mut self, now_ms: u64) -> bool {
        self.buffer.on_page_unload(now_ms)
    }

    /// Id of the initialized session.
    pub fn session_id(&self) -> Option<&str> {
        self.context
            .as_ref()
            .map(|context| context.session_id.as_str())
    }

    /// Question currently shown.
    pub fn current_question(&self) -> Option<&str> {
        self.context
            .as_ref()
            .and_then(|context| context.current.as_deref())
    }

    /// Event buffer owned by this capture.
    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    /// Mutable access to the owned event buffer.
    pub fn buffer_mut(&mut self) -> &mut EventBuffer {
        &mut self.buffer
    }
}

fn emit(
    buffer: &mut EventBuffer,
    kind: EventKind,
    session_id: &str,
    payload: serde_json::Value,
    now_ms: u64,
) {
    buffer.push(NewEvent::new(kind, session_id, payload), now_ms);
}
