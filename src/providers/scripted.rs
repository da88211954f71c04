use std::{collections::VecDeque, sync::Mutex, time::Duration};

use async_trait::async_trait;

use crate::{
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse},
    LLMError,
};

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Error(String),
    /// Sleeps before answering; used to exercise caller timeouts.
    Delayed(Duration, String),
}

/// Replays canned replies in order. Once the queue is drained every call fails,
/// unless a fallback reply was configured with [`ScriptedProvider::repeating`].
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    repeat: Option<ScriptedReply>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        for response in responses {
            provider.push(ScriptedReply::Text(response.into()));
        }
        provider
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new().repeating(ScriptedReply::Error(message.into()))
    }

    pub fn repeating(mut self, reply: ScriptedReply) -> Self {
        self.repeat = Some(reply);
        self
    }

    pub fn push(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> Option<ScriptedReply> {
        let queued = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        queued.or_else(|| self.repeat.clone())
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let content = match self.next_reply() {
            Some(ScriptedReply::Text(text)) => text,
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                text
            }
            Some(ScriptedReply::Error(message)) => return Err(LLMError::Provider(message)),
            None => return Err(LLMError::Provider("no more scripted responses".to_string())),
        };

        Ok(CompletionResponse {
            message: ChatMessage::assistant(content),
            usage: None,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::{ScriptedProvider, ScriptedReply};
    use crate::{providers::LLMProvider, types::CompletionRequest, LLMError};

    #[tokio::test]
    async fn replays_in_order_then_fails() {
        let provider = ScriptedProvider::from_responses(["first", "second"]);
        let request = CompletionRequest::new("model", Vec::new());

        let a = provider.complete(request.clone()).await.unwrap();
        let b = provider.complete(request.clone()).await.unwrap();
        assert_eq!(a.message.text(), Some("first"));
        assert_eq!(b.message.text(), Some("second"));
        assert!(matches!(
            provider.complete(request).await,
            Err(LLMError::Provider(_))
        ));
        assert_eq!(provider.request_count(), 3);
    }

    #[tokio::test]
    async fn repeating_reply_never_drains() {
        let provider = ScriptedProvider::new().repeating(ScriptedReply::Text("again".into()));
        for _ in 0..3 {
            let response = provider
                .complete(CompletionRequest::new("model", Vec::new()))
                .await
                .unwrap();
            assert_eq!(response.message.text(), Some("again"));
        }
    }
}
