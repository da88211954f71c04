use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(&'static str),

    #[error("invalid response from provider: {0}")]
    InvalidResponse(&'static str),
}

/// Raised while turning raw configuration into a [`crate::DemoScript`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON demo config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML demo config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("unsupported config file extension: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("{context}: missing required field `{field}`")]
    MissingField { context: String, field: &'static str },

    #[error("step {index}: unknown action kind `{value}`")]
    UnknownActionKind { index: usize, value: String },

    #[error("command route {index}: unknown command `{value}`")]
    UnknownCommand { index: usize, value: String },

    #[error("command route {index}: {reason}")]
    InvalidCommand { index: usize, reason: String },

    #[error("demo script has no steps")]
    EmptySteps,
}

#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("browser action failed: {0}")]
    Failed(String),

    #[error("browser action timed out")]
    Timeout,

    #[error("browser is not available: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] LLMError),

    #[error("prompt rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("answer generation timed out")]
    Timeout,

    #[error("model returned an empty answer")]
    Empty,
}

#[derive(Debug, Clone, Error)]
pub enum SpeechError {
    #[error("speech output failed: {0}")]
    Failed(String),

    #[error("speech output timed out")]
    Timeout,
}

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("no input captured before the timeout")]
    Timeout,

    #[error("input capture unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("timed out waiting for an interrupt")]
    Timeout,

    #[error("interrupt channel closed")]
    Closed,
}
