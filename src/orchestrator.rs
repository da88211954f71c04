//! The step loop that drives one session from `Running` to `Ended`.
//!
//! Steps execute strictly in order. Interrupts are only observed inside a
//! step's wait window; each one suspends the demo, is classified and handled,
//! and the demo then resumes at the step it was interrupted on.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::oneshot,
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    channel::Interrupt,
    collaborators::AnswerContext,
    config::ResumePolicy,
    error::{ActionError, CaptureError, ChannelError, GenerationError, SpeechError},
    intent::{CommandKind, Intent},
    script::{ActionKind, DemoStep},
    session::{DemoEvent, DemoSession, EndReason, QaEntry, SessionState},
};

/// Slack on top of the capture timeout before the orchestrator stops waiting
/// for the capture task to report back.
const CAPTURE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Ended,
}

pub(crate) struct DemoOrchestrator {
    session: Arc<DemoSession>,
}

impl DemoOrchestrator {
    pub(crate) fn new(session: Arc<DemoSession>) -> Self {
        Self { session }
    }

    pub(crate) async fn drive(self) {
        let session = &self.session;
        let script = session.script();
        info!(
            session = %session.id(),
            product = script.product_name(),
            steps = script.len(),
            "demo started"
        );

        if let Some(welcome) = script.welcome_message() {
            self.narrate(welcome).await;
        }

        loop {
            if session.is_ended() {
                return;
            }
            let index = session.cursor();
            let Some(step) = script.step(index) else {
                break;
            };
            if !session.transition(SessionState::Running) {
                return;
            }

            self.execute_step(index, step).await;
            if session.is_ended() {
                return;
            }

            if self.wait_window(step.wait()).await == Flow::Ended {
                return;
            }
            session.advance_cursor(index);
        }

        if self.final_window().await == Flow::Ended {
            return;
        }
        if !session.transition(SessionState::Completed) {
            return;
        }
        session.emit(DemoEvent::Completed { steps: script.len() });
        info!(session = %session.id(), "demo completed");

        if let Some(closing) = script.closing_message() {
            self.narrate(closing).await;
        }
        session.end(EndReason::Completed);
    }

    async fn execute_step(&self, index: usize, step: &DemoStep) {
        let session = &self.session;
        info!(
            session = %session.id(),
            step = index + 1,
            total = session.script().len(),
            name = step.name(),
            "executing step"
        );
        session.emit(DemoEvent::StepStarted {
            index,
            name: step.name().to_string(),
        });

        self.narrate(step.narration()).await;
        if session.is_ended() {
            return;
        }

        match self.perform(step.action_kind(), step.target()).await {
            Ok(()) => session.emit(DemoEvent::StepCompleted { index }),
            Err(err) => {
                warn!(session = %session.id(), step = index + 1, error = %err, "step action failed");
                session.emit(DemoEvent::StepFailed {
                    index,
                    reason: err.to_string(),
                });
                self.narrate(&session.config().action_apology).await;
            }
        }
    }

    async fn perform(&self, action_kind: ActionKind, target: &str) -> Result<(), ActionError> {
        let browser = &self.session.collaborators().browser;
        match time::timeout(
            self.session.config().collaborator_timeout,
            browser.perform(action_kind, target),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout),
        }
    }

    async fn wait_window(&self, duration: Duration) -> Flow {
        let interrupts = self.session.interrupts();
        let deadline = Instant::now() + duration;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match interrupts.take_blocking(remaining).await {
                Ok(interrupt) => {
                    if self.handle_and_drain(interrupt).await == Flow::Ended {
                        return Flow::Ended;
                    }
                    match self.session.config().resume_policy {
                        ResumePolicy::SkipRemainingWait => return Flow::Continue,
                        ResumePolicy::FinishRemainingWait => continue,
                    }
                }
                Err(ChannelError::Timeout) => return Flow::Continue,
                Err(ChannelError::Closed) => return Flow::Ended,
            }
        }
    }

    /// Anything still pending after the last step is answered before
    /// completion; the optional question window restarts after each answer.
    async fn final_window(&self) -> Flow {
        let interrupts = self.session.interrupts();
        let window = self.session.config().final_questions_window;

        loop {
            if let Some(interrupt) = interrupts.try_take() {
                if self.handle_and_drain(interrupt).await == Flow::Ended {
                    return Flow::Ended;
                }
            }
            if window.is_zero() {
                return Flow::Continue;
            }
            match interrupts.take_blocking(window).await {
                Ok(interrupt) => {
                    if self.handle_and_drain(interrupt).await == Flow::Ended {
                        return Flow::Ended;
                    }
                }
                Err(ChannelError::Timeout) => return Flow::Continue,
                Err(ChannelError::Closed) => return Flow::Ended,
            }
        }
    }

    async fn handle_and_drain(&self, first: Interrupt) -> Flow {
        let mut next = Some(first);
        while let Some(interrupt) = next {
            if self.handle_interrupt(interrupt).await == Flow::Ended {
                return Flow::Ended;
            }
            next = self.session.interrupts().try_take();
        }
        Flow::Continue
    }

    async fn handle_interrupt(&self, interrupt: Interrupt) -> Flow {
        let session = &self.session;
        let cursor = session.cursor();
        if !session.transition(SessionState::Suspended) {
            return Flow::Ended;
        }
        session.emit(DemoEvent::Interrupted { cursor });
        debug!(session = %session.id(), cursor, ?interrupt, "demo suspended");

        let utterance = match interrupt {
            Interrupt::Utterance(text) => Some(text),
            Interrupt::Silence => None,
            Interrupt::Listen => match self.capture_utterance().await {
                Some(captured) => captured,
                None => return Flow::Ended,
            },
        };

        if !session.transition(SessionState::Answering) {
            return Flow::Ended;
        }

        let intent = match utterance {
            Some(text) => {
                session
                    .collaborators()
                    .classifier
                    .classify(&text, session.script().vocabulary())
                    .await
            }
            None => Intent::Unknown,
        };
        if session.is_ended() {
            debug!(session = %session.id(), "session ended during classification; discarding");
            return Flow::Ended;
        }
        session.emit(DemoEvent::IntentResolved {
            cursor,
            intent: intent.clone(),
        });

        match intent {
            Intent::Command { command } => self.dispatch_command(cursor, command).await,
            Intent::Question { text } => self.answer_question(cursor, text).await,
            Intent::Unknown => self.narrate(&session.config().unknown_narration).await,
        }
        if session.is_ended() {
            return Flow::Ended;
        }

        if cursor + 1 < session.script().len() {
            if let Some(resume) = &session.config().resume_narration {
                self.narrate(resume).await;
            }
        }

        if session.transition(SessionState::Running) {
            Flow::Continue
        } else {
            Flow::Ended
        }
    }

    /// `None` means the session ended while listening; `Some(None)` means
    /// nothing usable was heard. Interrupts pushed meanwhile stay queued.
    async fn capture_utterance(&self) -> Option<Option<String>> {
        let session = &self.session;
        let capture_timeout = session.config().capture_timeout;
        let (heard_tx, heard_rx) = oneshot::channel();

        let task = tokio::spawn({
            let session = Arc::clone(session);
            async move {
                let capture = &session.collaborators().capture;
                let heard = match time::timeout(capture_timeout, capture.capture(capture_timeout)).await {
                    Ok(Ok(text)) => Some(text),
                    Ok(Err(err)) => {
                        debug!(session = %session.id(), error = %err, "capture produced no utterance");
                        None
                    }
                    Err(_) => {
                        debug!(session = %session.id(), error = %CaptureError::Timeout, "capture produced no utterance");
                        None
                    }
                };
                let _ = heard_tx.send(heard);
            }
        });

        let deadline = Instant::now() + capture_timeout + CAPTURE_GRACE;
        let outcome = tokio::select! {
            heard = heard_rx => Some(heard.ok().flatten()),
            _ = time::sleep_until(deadline) => {
                warn!(session = %session.id(), "no utterance captured in time");
                Some(None)
            }
            _ = session.wait_ended() => None,
        };
        task.abort();
        outcome
    }

    async fn dispatch_command(&self, cursor: usize, command: CommandKind) {
        let session = &self.session;
        let Some(route) = session.script().vocabulary().route(command) else {
            warn!(session = %session.id(), %command, "command has no route in this demo");
            self.narrate(&session.config().unknown_narration).await;
            return;
        };

        info!(session = %session.id(), %command, location = route.target(), "dispatching command");
        let result = self.perform(route.action_kind(), route.target()).await;
        if let Err(err) = &result {
            warn!(session = %session.id(), %command, error = %err, "command action failed");
        }
        session.emit(DemoEvent::CommandDispatched {
            cursor,
            command,
            succeeded: result.is_ok(),
        });
        if result.is_err() {
            self.narrate(&session.config().action_apology).await;
        }
    }

    async fn answer_question(&self, cursor: usize, question: String) {
        let session = &self.session;
        let config = session.config();
        let context = self.answer_context(cursor);
        let answers = &session.collaborators().answers;

        let generated = match time::timeout(
            config.collaborator_timeout,
            answers.answer(&question, &context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout),
        };
        let (answer, fallback) = match generated {
            Ok(answer) => (answer, false),
            Err(err) => {
                warn!(session = %session.id(), error = %err, "answer generation failed; using fallback");
                (config.answer_fallback.clone(), true)
            }
        };

        let entry = QaEntry {
            question: question.clone(),
            answer: answer.clone(),
            step: cursor,
            fallback,
            asked_at: Utc::now(),
        };
        if !session.record_answer(entry) {
            debug!(session = %session.id(), "session ended during answer generation; discarding");
            return;
        }
        session.emit(DemoEvent::Answered {
            cursor,
            question,
            fallback,
        });
        self.narrate(&answer).await;
    }

    fn answer_context(&self, cursor: usize) -> AnswerContext {
        let script = self.session.script();
        let current = script.step(cursor.min(script.len().saturating_sub(1)));
        AnswerContext {
            product_name: script.product_name().to_string(),
            product_description: script.description().map(str::to_string),
            current_step: current.map(|step| step.name().to_string()),
            current_narration: current
                .map(|step| step.narration().to_string())
                .filter(|narration| !narration.is_empty()),
            covered_steps: script
                .steps()
                .iter()
                .take(cursor)
                .map(|step| step.name().to_string())
                .collect(),
        }
    }

    /// Speech failures never stop the demo.
    async fn narrate(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let session = &self.session;
        let config = session.config();
        let speech = &session.collaborators().speech;

        match time::timeout(config.collaborator_timeout, speech.speak(text, config.volume)).await {
            Ok(Ok(seconds)) => session.record_narration(text, seconds),
            Ok(Err(err)) => warn!(session = %session.id(), error = %err, "narration failed"),
            Err(_) => warn!(session = %session.id(), error = %SpeechError::Timeout, "narration failed"),
        }
        session.emit(DemoEvent::Narrated {
            text: text.to_string(),
        });
    }
}
