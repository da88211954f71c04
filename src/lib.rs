pub mod error;
pub mod providers;
pub mod types;
pub mod script;
pub mod intent;
pub mod channel;
pub mod collaborators;
pub mod config;
pub mod session;
pub mod registry;
mod orchestrator;

pub use error::{
    ActionError, CaptureError, ChannelError, GenerationError, LLMError, LoadError, SpeechError,
};
pub use providers::LLMProvider;
pub use types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage};
pub use script::{
    ActionKind, DemoScript, DemoStep, LoginCredentials, RawDemoConfig, RawDemoStep, ScriptCatalog,
};
pub use intent::{CommandKind, CommandRoute, Intent, IntentClassifier, Vocabulary};
pub use channel::{Interrupt, InterruptChannel};
pub use collaborators::{
    AnswerContext, AnswerGenerator, BrowserAutomation, DemoCollaborators, InputCapture,
    LlmAnswerGenerator, SpeechOutput,
};
pub use config::{ClassifierConfig, OrchestratorConfig, ResumePolicy};
pub use session::{
    DemoEvent, EndReason, EventCallback, QaEntry, SessionHandle, SessionId, SessionState,
    SessionStatus,
};
pub use registry::SessionRegistry;
