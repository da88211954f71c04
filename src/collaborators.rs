use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use tracing::info;

use crate::{
    error::{ActionError, CaptureError, GenerationError, SpeechError},
    intent::IntentClassifier,
    script::ActionKind,
    types::{ChatMessage, CompletionRequest},
    LLMProvider,
};

#[async_trait]
pub trait BrowserAutomation: Send + Sync {
    async fn perform(&self, action_kind: ActionKind, target: &str) -> Result<(), ActionError>;

    async fn shutdown(&self) -> Result<(), ActionError> {
        Ok(())
    }
}

#[async_trait]
pub trait SpeechOutput: Send + Sync {
    async fn speak(&self, text: &str, volume: f32) -> Result<f64, SpeechError>;
}

#[async_trait]
pub trait InputCapture: Send + Sync {
    async fn capture(&self, timeout: Duration) -> Result<String, CaptureError>;
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(&self, question: &str, context: &AnswerContext) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerContext {
    pub product_name: String,
    pub product_description: Option<String>,
    pub current_step: Option<String>,
    pub current_narration: Option<String>,
    pub covered_steps: Vec<String>,
}

#[derive(Clone)]
pub struct DemoCollaborators {
    pub browser: Arc<dyn BrowserAutomation>,
    pub speech: Arc<dyn SpeechOutput>,
    pub capture: Arc<dyn InputCapture>,
    pub answers: Arc<dyn AnswerGenerator>,
    pub classifier: IntentClassifier,
}

impl fmt::Debug for DemoCollaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoCollaborators")
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}

impl DemoCollaborators {
    pub fn new(
        browser: Arc<dyn BrowserAutomation>,
        speech: Arc<dyn SpeechOutput>,
        capture: Arc<dyn InputCapture>,
        answers: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            browser,
            speech,
            capture,
            answers,
            classifier: IntentClassifier::keyword_only(),
        }
    }

    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

const ANSWER_TEMPLATE: &str = "\
You are a friendly sales engineer presenting {{product_name}} in a live, narrated demo.
{{#if product_description}}About the product: {{product_description}}
{{/if}}{{#if current_step}}The audience is looking at: {{current_step}}.
{{/if}}{{#if covered_steps}}Already shown: {{#each covered_steps}}{{this}}{{#unless @last}}, {{/unless}}{{/each}}.
{{/if}}Answer the customer's question out loud, briefly and warmly, in at most two sentences. \
If it is unrelated to {{product_name}}, steer back to the product politely.";

pub struct LlmAnswerGenerator {
    provider: Arc<dyn LLMProvider>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl LlmAnswerGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: 120,
            temperature: 0.4,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn render_prompt(context: &AnswerContext) -> Result<String, GenerationError> {
        let mut hb = Handlebars::new();
        hb.register_escape_fn(handlebars::no_escape);
        Ok(hb.render_template(ANSWER_TEMPLATE, context)?)
    }
}

#[async_trait]
impl AnswerGenerator for LlmAnswerGenerator {
    async fn answer(&self, question: &str, context: &AnswerContext) -> Result<String, GenerationError> {
        let system = Self::render_prompt(context)?;
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![ChatMessage::system(system), ChatMessage::user(question.to_string())],
        )
        .with_max_tokens(self.max_tokens)
        .with_temperature(self.temperature);

        let response = self.provider.complete(request).await?;
        let answer = response.message.text().unwrap_or_default().trim().to_string();
        if answer.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(answer)
    }
}

/// Rough playback length at 150 spoken words per minute.
pub fn estimate_speech_seconds(text: &str) -> f64 {
    let words = text.split_whitespace().count() as f64;
    words / 150.0 * 60.0
}

#[derive(Debug, Default)]
pub struct LoggingBrowser;

#[async_trait]
impl BrowserAutomation for LoggingBrowser {
    async fn perform(&self, action_kind: ActionKind, target: &str) -> Result<(), ActionError> {
        info!(%action_kind, location = target, "browser action");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ActionError> {
        info!("browser closed");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct LoggingSpeech;

#[async_trait]
impl SpeechOutput for LoggingSpeech {
    async fn speak(&self, text: &str, volume: f32) -> Result<f64, SpeechError> {
        let seconds = estimate_speech_seconds(text);
        info!(volume, estimated_seconds = seconds, "narration: {text}");
        Ok(seconds)
    }
}

#[derive(Debug, Default)]
pub struct NoInputCapture;

#[async_trait]
impl InputCapture for NoInputCapture {
    async fn capture(&self, _timeout: Duration) -> Result<String, CaptureError> {
        Err(CaptureError::Unavailable("no microphone configured".to_string()))
    }
}

#[derive(Debug, Default)]
pub struct NoAnswerGenerator;

#[async_trait]
impl AnswerGenerator for NoAnswerGenerator {
    async fn answer(&self, _question: &str, _context: &AnswerContext) -> Result<String, GenerationError> {
        Err(GenerationError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::providers::scripted::ScriptedProvider;

    fn context() -> AnswerContext {
        AnswerContext {
            product_name: "GIKI Transport".into(),
            product_description: Some("Campus transport booking & payments".into()),
            current_step: Some("Ticket Management".into()),
            current_narration: None,
            covered_steps: vec!["Homepage".into(), "Sign-in Page".into()],
        }
    }

    #[test]
    fn prompt_includes_demo_context_unescaped() {
        let prompt = LlmAnswerGenerator::render_prompt(&context()).unwrap();
        assert!(prompt.contains("presenting GIKI Transport"));
        assert!(prompt.contains("booking & payments"));
        assert!(prompt.contains("looking at: Ticket Management."));
        assert!(prompt.contains("Already shown: Homepage, Sign-in Page."));
    }

    #[test]
    fn prompt_omits_missing_sections() {
        let prompt = LlmAnswerGenerator::render_prompt(&AnswerContext {
            product_name: "Acme".into(),
            ..AnswerContext::default()
        })
        .unwrap();
        assert!(!prompt.contains("About the product"));
        assert!(!prompt.contains("Already shown"));
    }

    #[tokio::test]
    async fn answers_with_model_output() {
        let provider = Arc::new(ScriptedProvider::from_responses(["  Refunds take 3 days.  "]));
        let generator = LlmAnswerGenerator::new(provider.clone(), "model");
        let answer = generator
            .answer("what is the refund policy?", &context())
            .await
            .unwrap();
        assert_eq!(answer, "Refunds take 3 days.");

        let request = &provider.requests()[0];
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[1].text(), Some("what is the refund policy?"));
    }

    #[tokio::test]
    async fn empty_or_failed_generation_is_an_error() {
        let empty = LlmAnswerGenerator::new(Arc::new(ScriptedProvider::from_responses([" "])), "m");
        assert!(matches!(
            empty.answer("q", &context()).await,
            Err(GenerationError::Empty)
        ));

        let failing = LlmAnswerGenerator::new(Arc::new(ScriptedProvider::failing("down")), "m");
        assert!(matches!(
            failing.answer("q", &context()).await,
            Err(GenerationError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn no_answer_generator_always_defers_to_fallback() {
        let result = NoAnswerGenerator.answer("anything?", &context()).await;
        assert!(matches!(result, Err(GenerationError::Empty)));
    }

    #[test]
    fn speech_estimate_scales_with_words() {
        assert_eq!(estimate_speech_seconds(""), 0.0);
        let thirty_words = vec!["word"; 30].join(" ");
        assert!((estimate_speech_seconds(&thirty_words) - 12.0).abs() < f64::EPSILON);
    }
}
