use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time};
use tracing::{info, warn};

use crate::{
    channel::{Interrupt, InterruptChannel},
    collaborators::DemoCollaborators,
    config::OrchestratorConfig,
    error::ChannelError,
    intent::{CommandKind, Intent},
    orchestrator::DemoOrchestrator,
    script::DemoScript,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Suspended,
    Answering,
    Completed,
    Ended,
}

impl SessionState {
    pub fn is_ended(&self) -> bool {
        matches!(self, SessionState::Ended)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Requested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "demo-{}", self.0)
    }
}

/// One answered question. `step` is the cursor at the time it was asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaEntry {
    pub question: String,
    pub answer: String,
    pub step: usize,
    pub fallback: bool,
    pub asked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narration {
    pub text: String,
    pub estimated_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DemoEvent {
    StateChanged { from: SessionState, to: SessionState },
    StepStarted { index: usize, name: String },
    StepCompleted { index: usize },
    StepFailed { index: usize, reason: String },
    Interrupted { cursor: usize },
    IntentResolved { cursor: usize, intent: Intent },
    Answered { cursor: usize, question: String, fallback: bool },
    CommandDispatched { cursor: usize, command: CommandKind, succeeded: bool },
    Narrated { text: String },
    Completed { steps: usize },
    Ended { reason: EndReason },
}

pub type EventCallback = Arc<dyn Fn(&DemoEvent) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub product_name: String,
    pub state: SessionState,
    pub cursor: usize,
    pub total_steps: usize,
    pub current_step: Option<String>,
    pub qa_log: Vec<QaEntry>,
    pub last_narration: Option<Narration>,
    pub end_reason: Option<EndReason>,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    cursor: usize,
    qa_log: Vec<QaEntry>,
    events: Vec<DemoEvent>,
    last_narration: Option<Narration>,
    end_reason: Option<EndReason>,
}

/// Live execution context of one demo run. Shared between the orchestrator
/// task and callers; the script is read-only for the whole run.
pub struct DemoSession {
    id: SessionId,
    script: Arc<DemoScript>,
    collaborators: DemoCollaborators,
    config: OrchestratorConfig,
    interrupts: InterruptChannel<Interrupt>,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
    browser_released: AtomicBool,
    event_callback: Option<EventCallback>,
}

impl fmt::Debug for DemoSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoSession")
            .field("id", &self.id)
            .field("product", &self.script.product_name())
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .finish()
    }
}

impl DemoSession {
    pub fn new(
        id: SessionId,
        script: Arc<DemoScript>,
        collaborators: DemoCollaborators,
        config: OrchestratorConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            id,
            script,
            collaborators,
            config,
            interrupts: InterruptChannel::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                cursor: 0,
                qa_log: Vec::new(),
                events: Vec::new(),
                last_narration: None,
                end_reason: None,
            }),
            state_tx,
            browser_released: AtomicBool::new(false),
            event_callback: None,
        }
    }

    pub fn with_event_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.event_callback = callback;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn script(&self) -> &DemoScript {
        &self.script
    }

    pub fn collaborators(&self) -> &DemoCollaborators {
        &self.collaborators
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn interrupts(&self) -> &InterruptChannel<Interrupt> {
        &self.interrupts
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    pub fn is_ended(&self) -> bool {
        self.state().is_ended()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.lock().end_reason
    }

    pub fn qa_log(&self) -> Vec<QaEntry> {
        self.lock().qa_log.clone()
    }

    pub fn events(&self) -> Vec<DemoEvent> {
        self.lock().events.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        SessionStatus {
            id: self.id,
            product_name: self.script.product_name().to_string(),
            state: inner.state,
            cursor: inner.cursor,
            total_steps: self.script.len(),
            current_step: self.script.step(inner.cursor).map(|s| s.name().to_string()),
            qa_log: inner.qa_log.clone(),
            last_narration: inner.last_narration.clone(),
            end_reason: inner.end_reason,
        }
    }

    pub(crate) fn emit(&self, event: DemoEvent) {
        self.lock().events.push(event.clone());
        if let Some(callback) = &self.event_callback {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (callback)(&event)));
        }
    }

    /// Idle -> Running. On any other state returns it unchanged as the error.
    pub(crate) fn begin_run(&self) -> Result<(), SessionState> {
        {
            let mut inner = self.lock();
            if inner.state != SessionState::Idle {
                return Err(inner.state);
            }
            inner.state = SessionState::Running;
        }
        self.state_tx.send_replace(SessionState::Running);
        self.emit(DemoEvent::StateChanged {
            from: SessionState::Idle,
            to: SessionState::Running,
        });
        Ok(())
    }

    /// Moves to `to` unless the session already ended. `Ended` is only reached through [`Self::end`].
    pub(crate) fn transition(&self, to: SessionState) -> bool {
        debug_assert!(to != SessionState::Ended);
        let from = {
            let mut inner = self.lock();
            if inner.state.is_ended() {
                return false;
            }
            std::mem::replace(&mut inner.state, to)
        };
        if from != to {
            self.state_tx.send_replace(to);
            self.emit(DemoEvent::StateChanged { from, to });
        }
        true
    }

    /// Moves the cursor from `from` to `from + 1`; never backwards, never twice.
    pub(crate) fn advance_cursor(&self, from: usize) -> bool {
        let mut inner = self.lock();
        if inner.state.is_ended() || inner.cursor != from {
            return false;
        }
        inner.cursor = from + 1;
        true
    }

    pub(crate) fn record_answer(&self, entry: QaEntry) -> bool {
        let mut inner = self.lock();
        if inner.state.is_ended() {
            return false;
        }
        inner.qa_log.push(entry);
        true
    }

    pub(crate) fn record_narration(&self, text: &str, estimated_seconds: f64) {
        self.lock().last_narration = Some(Narration {
            text: text.to_string(),
            estimated_seconds,
        });
    }

    /// Terminal transition; safe from any state. Returns `false` if already ended.
    pub(crate) fn end(&self, reason: EndReason) -> bool {
        let from = {
            let mut inner = self.lock();
            if inner.state.is_ended() {
                return false;
            }
            inner.end_reason = Some(reason);
            std::mem::replace(&mut inner.state, SessionState::Ended)
        };

        self.interrupts.close();
        self.state_tx.send_replace(SessionState::Ended);
        self.emit(DemoEvent::StateChanged {
            from,
            to: SessionState::Ended,
        });
        self.emit(DemoEvent::Ended { reason });
        info!(session = %self.id, ?reason, "demo session ended");
        true
    }

    pub(crate) async fn wait_ended(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|state| state.is_ended()).await;
    }

    /// `true` exactly once per session.
    fn claim_browser_release(&self) -> bool {
        !self.browser_released.swap(true, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<DemoSession>,
}

impl SessionHandle {
    pub fn new(session: DemoSession) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn session(&self) -> &DemoSession {
        &self.session
    }

    /// Starts the orchestrator task. On a non-idle session this is a no-op
    /// that reports the current state.
    pub fn run(&self) -> SessionState {
        match self.session.begin_run() {
            Ok(()) => {
                let orchestrator = DemoOrchestrator::new(Arc::clone(&self.session));
                tokio::spawn(orchestrator.drive());
                SessionState::Running
            }
            Err(state) => state,
        }
    }

    /// Queues an interrupt; returns `true` when it overwrote an unclaimed one.
    pub fn submit_interrupt(&self, interrupt: Interrupt) -> Result<bool, ChannelError> {
        self.session.interrupts().push(interrupt)
    }

    pub fn ask(&self, question: impl Into<String>) -> Result<bool, ChannelError> {
        self.submit_interrupt(Interrupt::Utterance(question.into()))
    }

    pub fn listen(&self) -> Result<bool, ChannelError> {
        self.submit_interrupt(Interrupt::Listen)
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn events(&self) -> Vec<DemoEvent> {
        self.session.events()
    }

    pub fn end(&self) -> SessionState {
        self.session.end(EndReason::Requested);
        SessionState::Ended
    }

    /// Ends the session and releases its browser once; later calls return
    /// `false` without touching the browser. Teardown errors are logged only.
    pub async fn shutdown(&self) -> bool {
        self.end();
        if !self.session.claim_browser_release() {
            return false;
        }
        let browser = &self.session.collaborators().browser;
        match time::timeout(self.session.config().collaborator_timeout, browser.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(session = %self.id(), error = %err, "browser teardown failed"),
            Err(_) => warn!(session = %self.id(), "browser teardown timed out"),
        }
        true
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.state_tx.subscribe()
    }

    pub async fn finished(&self) -> SessionStatus {
        self.session.wait_ended().await;
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        collaborators::{LoggingBrowser, LoggingSpeech, NoAnswerGenerator, NoInputCapture},
        script::{ActionKind, DemoStep},
    };

    fn session() -> DemoSession {
        let script = DemoScript::new(
            "Acme",
            "https://acme.test",
            vec![
                DemoStep::new("Home", ActionKind::Navigate, "/"),
                DemoStep::new("Pricing", ActionKind::Navigate, "/pricing"),
            ],
        )
        .unwrap();
        let collaborators = DemoCollaborators::new(
            Arc::new(LoggingBrowser),
            Arc::new(LoggingSpeech),
            Arc::new(NoInputCapture),
            Arc::new(NoAnswerGenerator),
        );
        DemoSession::new(SessionId(7), Arc::new(script), collaborators, OrchestratorConfig::default())
    }

    fn entry(question: &str) -> QaEntry {
        QaEntry {
            question: question.into(),
            answer: "a".into(),
            step: 0,
            fallback: false,
            asked_at: Utc::now(),
        }
    }

    #[test]
    fn begin_run_only_leaves_idle_once() {
        let session = session();
        assert_eq!(session.begin_run(), Ok(()));
        assert_eq!(session.begin_run(), Err(SessionState::Running));
    }

    #[test]
    fn cursor_moves_forward_one_step_at_a_time() {
        let session = session();
        assert!(session.advance_cursor(0));
        assert!(!session.advance_cursor(0));
        assert!(!session.advance_cursor(5));
        assert_eq!(session.cursor(), 1);
    }

    #[test]
    fn ended_is_terminal() {
        let session = session();
        session.begin_run().unwrap();
        assert!(session.end(EndReason::Requested));
        assert!(!session.end(EndReason::Completed));

        assert!(!session.transition(SessionState::Running));
        assert!(!session.advance_cursor(0));
        assert!(!session.record_answer(entry("late")));
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.end_reason(), Some(EndReason::Requested));
        assert!(session.interrupts().is_closed());
        assert!(session.qa_log().is_empty());
    }

    #[test]
    fn events_reach_the_callback_and_the_log() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let session = session().with_event_callback(Some(Arc::new(move |_: &DemoEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        session.begin_run().unwrap();
        session.transition(SessionState::Running);
        session.transition(SessionState::Suspended);

        // Running -> Running is not a change.
        assert_eq!(session.events().len(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn status_serializes_with_snake_case_states() {
        let session = session();
        session.record_answer(entry("what is it?"));
        session.record_narration("hello there", 0.8);

        let value = serde_json::to_value(session.status()).unwrap();
        assert_eq!(value["state"], "idle");
        assert_eq!(value["total_steps"], 2);
        assert_eq!(value["current_step"], "Home");
        assert_eq!(value["qa_log"][0]["question"], "what is it?");
        assert_eq!(value["last_narration"]["text"], "hello there");
        assert_eq!(SessionId(7).to_string(), "demo-7");
    }

    #[tokio::test]
    async fn subscribers_observe_the_end() {
        let handle = SessionHandle::new(session());
        let mut rx = handle.subscribe();
        assert_eq!(*rx.borrow(), SessionState::Idle);

        handle.end();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Ended);
        assert_eq!(handle.finished().await.state, SessionState::Ended);
    }
}
