use std::{env, time::Duration};

pub const DEFAULT_UNKNOWN_NARRATION: &str = "I didn't catch that, please rephrase";
pub const DEFAULT_ANSWER_FALLBACK: &str =
    "That's a great question! I can't look that up right now, but I'm happy to show you more as we go.";
pub const DEFAULT_ACTION_APOLOGY: &str =
    "Sorry, that part of the demo didn't load as expected. Let's keep going.";
pub const DEFAULT_RESUME_NARRATION: &str = "Let me continue the demo.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    #[default]
    SkipRemainingWait,
    FinishRemainingWait,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub capture_timeout: Duration,
    pub collaborator_timeout: Duration,
    pub volume: f32,
    pub resume_policy: ResumePolicy,
    pub resume_narration: Option<String>,
    /// Extra window for questions after the last step, before the closing message.
    pub final_questions_window: Duration,
    pub unknown_narration: String,
    pub answer_fallback: String,
    pub action_apology: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(8),
            collaborator_timeout: Duration::from_secs(30),
            volume: 0.8,
            resume_policy: ResumePolicy::default(),
            resume_narration: Some(DEFAULT_RESUME_NARRATION.to_string()),
            final_questions_window: Duration::ZERO,
            unknown_narration: DEFAULT_UNKNOWN_NARRATION.to_string(),
            answer_fallback: DEFAULT_ANSWER_FALLBACK.to_string(),
            action_apology: DEFAULT_ACTION_APOLOGY.to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_millis("DEMOPILOT_CAPTURE_TIMEOUT_MS") {
            config.capture_timeout = ms;
        }
        if let Some(ms) = env_millis("DEMOPILOT_COLLABORATOR_TIMEOUT_MS") {
            config.collaborator_timeout = ms;
        }
        if let Some(ms) = env_millis("DEMOPILOT_FINAL_QUESTIONS_MS") {
            config.final_questions_window = ms;
        }
        if let Ok(volume) = env::var("DEMOPILOT_VOLUME") {
            if let Ok(volume) = volume.parse::<f32>() {
                config = config.with_volume(volume);
            }
        }

        config
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Clamped into `0.0..=1.0`.
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self
    }

    pub fn with_resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.resume_policy = policy;
        self
    }

    pub fn with_resume_narration(mut self, narration: Option<String>) -> Self {
        self.resume_narration = narration;
        self
    }

    pub fn with_final_questions_window(mut self, window: Duration) -> Self {
        self.final_questions_window = window;
        self
    }

    pub fn with_unknown_narration(mut self, text: impl Into<String>) -> Self {
        self.unknown_narration = text.into();
        self
    }

    pub fn with_answer_fallback(mut self, text: impl Into<String>) -> Self {
        self.answer_fallback = text.into();
        self
    }

    pub fn with_action_apology(mut self, text: impl Into<String>) -> Self {
        self.action_apology = text.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl ClassifierConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = env::var("DEMOPILOT_CLASSIFIER_MODEL") {
            config.model = model;
        }
        if let Some(timeout) = env_millis("DEMOPILOT_CLASSIFIER_TIMEOUT_MS") {
            config.timeout = timeout;
        }
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}
