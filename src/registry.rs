use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::Mutex;
use tracing::info;

use crate::{
    collaborators::DemoCollaborators,
    config::OrchestratorConfig,
    error::LoadError,
    script::{DemoScript, RawDemoConfig},
    session::{DemoSession, EndReason, EventCallback, SessionHandle, SessionId},
};

/// Holds at most one live session per process. Creating a new session tears
/// down the previous one first.
pub struct SessionRegistry {
    current: Mutex<Option<SessionHandle>>,
    next_id: AtomicU64,
    config: OrchestratorConfig,
    event_callback: Option<EventCallback>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

impl SessionRegistry {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            config,
            event_callback: None,
        }
    }

    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn create(
        &self,
        script: impl Into<Arc<DemoScript>>,
        collaborators: DemoCollaborators,
    ) -> SessionHandle {
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            info!(session = %previous.id(), "replacing active demo session");
            previous.shutdown().await;
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = DemoSession::new(id, script.into(), collaborators, self.config.clone())
            .with_event_callback(self.event_callback.clone());
        let handle = SessionHandle::new(session);
        info!(session = %id, "demo session created");
        *current = Some(handle.clone());
        handle
    }

    pub async fn create_from_config(
        &self,
        raw: RawDemoConfig,
        collaborators: DemoCollaborators,
    ) -> Result<SessionHandle, LoadError> {
        let script = DemoScript::load(raw)?;
        Ok(self.create(script, collaborators).await)
    }

    /// The active session. A session that finished on its own stays visible
    /// for status queries; one that was explicitly ended does not.
    pub async fn current(&self) -> Option<SessionHandle> {
        let mut current = self.current.lock().await;
        if current
            .as_ref()
            .is_some_and(|handle| handle.session().end_reason() == Some(EndReason::Requested))
        {
            *current = None;
        }
        current.clone()
    }

    /// Ends `handle`; its browser is released at most once. Returns `false`
    /// when it was not the registered session.
    pub async fn end(&self, handle: &SessionHandle) -> bool {
        let mut current = self.current.lock().await;
        let registered = current.as_ref().is_some_and(|active| active.id() == handle.id());
        if registered {
            *current = None;
        }
        handle.shutdown().await;
        registered
    }

    pub async fn end_current(&self) -> Option<SessionId> {
        let previous = self.current.lock().await.take()?;
        previous.shutdown().await;
        Some(previous.id())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        collaborators::{LoggingSpeech, NoAnswerGenerator, NoInputCapture},
        error::ActionError,
        script::{ActionKind, DemoStep},
        session::SessionState,
        BrowserAutomation,
    };

    #[derive(Default)]
    struct CountingBrowser {
        shutdowns: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl BrowserAutomation for CountingBrowser {
        async fn perform(&self, _: ActionKind, _: &str) -> Result<(), ActionError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), ActionError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Err(ActionError::Failed("already closed".into()))
        }
    }

    fn script() -> DemoScript {
        DemoScript::new(
            "Acme",
            "https://acme.test",
            vec![DemoStep::new("Home", ActionKind::Navigate, "https://acme.test").with_wait_seconds(1)],
        )
        .unwrap()
    }

    fn collaborators(browser: Arc<CountingBrowser>) -> DemoCollaborators {
        DemoCollaborators::new(
            browser,
            Arc::new(LoggingSpeech),
            Arc::new(NoInputCapture),
            Arc::new(NoAnswerGenerator),
        )
    }

    #[tokio::test]
    async fn create_replaces_previous_session() {
        let registry = SessionRegistry::default();
        let first_browser = Arc::new(CountingBrowser::default());
        let first = registry.create(script(), collaborators(first_browser.clone())).await;
        let second = registry
            .create(script(), collaborators(Arc::new(CountingBrowser::default())))
            .await;

        assert_ne!(first.id(), second.id());
        assert_eq!(first.state(), SessionState::Ended);
        assert_eq!(second.state(), SessionState::Idle);
        // Teardown errors are swallowed.
        assert_eq!(first_browser.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(registry.current().await.map(|h| h.id()), Some(second.id()));
    }

    #[tokio::test]
    async fn current_is_empty_after_end() {
        let registry = SessionRegistry::default();
        let browser = Arc::new(CountingBrowser::default());
        let handle = registry.create(script(), collaborators(browser.clone())).await;
        assert!(registry.end(&handle).await);
        assert!(registry.current().await.is_none());
        assert!(!registry.end(&handle).await);
        assert_eq!(handle.state(), SessionState::Ended);
        assert_eq!(browser.shutdowns.load(Ordering::SeqCst), 1);

        assert!(!handle.shutdown().await);
        assert_eq!(browser.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_end_also_clears_current() {
        let registry = SessionRegistry::default();
        let handle = registry
            .create(script(), collaborators(Arc::new(CountingBrowser::default())))
            .await;
        handle.end();
        assert!(registry.current().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_session_stays_visible() {
        let registry = SessionRegistry::default();
        let handle = registry
            .create(script(), collaborators(Arc::new(CountingBrowser::default())))
            .await;
        handle.run();
        let status = tokio::time::timeout(Duration::from_secs(60), handle.finished())
            .await
            .unwrap();
        assert_eq!(status.end_reason, Some(EndReason::Completed));
        assert!(registry.current().await.is_some());
        assert_eq!(registry.end_current().await, Some(handle.id()));
        assert!(registry.current().await.is_none());
    }
}
