use std::{fmt, str::FromStr, sync::Arc};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, warn};

use crate::{
    config::ClassifierConfig,
    script::ActionKind,
    types::{ChatMessage, CompletionRequest},
    LLMError, LLMProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    ShowDemo,
    GoHome,
    GoToSignIn,
    GoToSignUp,
    CheckProfile,
    CheckTickets,
    BookTicket,
}

impl CommandKind {
    /// Default matching priority: more specific phrases first.
    pub const ALL: [CommandKind; 7] = [
        CommandKind::ShowDemo,
        CommandKind::GoToSignIn,
        CommandKind::GoToSignUp,
        CommandKind::BookTicket,
        CommandKind::CheckTickets,
        CommandKind::CheckProfile,
        CommandKind::GoHome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::ShowDemo => "show_demo",
            CommandKind::GoHome => "go_home",
            CommandKind::GoToSignIn => "go_to_sign_in",
            CommandKind::GoToSignUp => "go_to_sign_up",
            CommandKind::CheckProfile => "check_profile",
            CommandKind::CheckTickets => "check_tickets",
            CommandKind::BookTicket => "book_ticket",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CommandKind::ShowDemo => "start or restart the product demo",
            CommandKind::GoHome => "open the home page or dashboard",
            CommandKind::GoToSignIn => "open the sign-in page",
            CommandKind::GoToSignUp => "open the registration page",
            CommandKind::CheckProfile => "open the user's profile",
            CommandKind::CheckTickets => "list the user's tickets",
            CommandKind::BookTicket => "start a booking or payment",
        }
    }

    pub fn default_keywords(&self) -> &'static [&'static str] {
        match self {
            CommandKind::ShowDemo => &[
                "show demo",
                "show the demo",
                "start demo",
                "start the demo",
                "run demo",
                "run the demo",
            ],
            CommandKind::GoHome => &["home", "homepage", "dashboard", "main page"],
            CommandKind::GoToSignIn => &["sign in", "log in"],
            CommandKind::GoToSignUp => &["sign up", "register", "create account"],
            CommandKind::CheckProfile => &["profile", "my account", "account settings"],
            CommandKind::CheckTickets => &["ticket", "tickets"],
            CommandKind::BookTicket => &["book", "book now", "booking", "pay", "payment", "wallet"],
        }
    }

    fn default_path(&self) -> &'static str {
        match self {
            CommandKind::ShowDemo | CommandKind::GoHome => "",
            CommandKind::GoToSignIn => "auth/signin/",
            CommandKind::GoToSignUp => "auth/signup/",
            CommandKind::CheckProfile => "auth/profile/",
            CommandKind::CheckTickets => "my-tickets/",
            CommandKind::BookTicket => "booking/",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_key(value).as_str() {
            "showdemo" | "demo" => Ok(CommandKind::ShowDemo),
            "gohome" | "home" => Ok(CommandKind::GoHome),
            "gotosignin" | "signin" | "login" => Ok(CommandKind::GoToSignIn),
            "gotosignup" | "signup" | "register" => Ok(CommandKind::GoToSignUp),
            "checkprofile" | "profile" => Ok(CommandKind::CheckProfile),
            "checktickets" | "tickets" => Ok(CommandKind::CheckTickets),
            "bookticket" | "book" | "booking" => Ok(CommandKind::BookTicket),
            _ => Err(value.to_string()),
        }
    }
}

fn normalize_key(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[derive(Debug, Clone)]
pub struct CommandRoute {
    command: CommandKind,
    keywords: Vec<String>,
    action_kind: ActionKind,
    target: String,
    pattern: Regex,
}

impl PartialEq for CommandRoute {
    fn eq(&self, other: &Self) -> bool {
        self.command == other.command
            && self.keywords == other.keywords
            && self.action_kind == other.action_kind
            && self.target == other.target
    }
}

impl CommandRoute {
    /// Keywords are phrases; words may be separated by any whitespace or none
    /// ("sign in" also matches "signin").
    pub fn new<I, S>(
        command: CommandKind,
        keywords: I,
        action_kind: ActionKind,
        target: impl Into<String>,
    ) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(Into::into)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(format!("{command} has no keywords"));
        }

        let alternatives: Vec<String> = keywords
            .iter()
            .map(|keyword| {
                keyword
                    .split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s*")
            })
            .collect();
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))
            .map_err(|err| err.to_string())?;

        Ok(Self {
            command,
            keywords,
            action_kind,
            target: target.into(),
            pattern,
        })
    }

    pub fn command(&self) -> CommandKind {
        self.command
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn action_kind(&self) -> ActionKind {
        self.action_kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn matches(&self, utterance: &str) -> bool {
        self.pattern.is_match(utterance)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    routes: Vec<CommandRoute>,
}

impl Vocabulary {
    pub fn new(routes: Vec<CommandRoute>) -> Self {
        Self { routes }
    }

    pub fn for_base_url(base_url: &str) -> Self {
        let routes = CommandKind::ALL
            .iter()
            .filter_map(|command| {
                CommandRoute::new(
                    *command,
                    command.default_keywords().iter().copied(),
                    ActionKind::Navigate,
                    join_url(base_url, command.default_path()),
                )
                .ok()
            })
            .collect();
        Self { routes }
    }

    pub fn routes(&self) -> &[CommandRoute] {
        &self.routes
    }

    pub fn route(&self, command: CommandKind) -> Option<&CommandRoute> {
        self.routes.iter().find(|route| route.command == command)
    }

    pub fn override_route(&mut self, route: CommandRoute) {
        match self.routes.iter_mut().find(|r| r.command == route.command) {
            Some(existing) => *existing = route,
            None => self.routes.push(route),
        }
    }

    pub fn match_keywords(&self, utterance: &str) -> Option<&CommandRoute> {
        self.routes.iter().find(|route| route.matches(utterance))
    }

    /// Resolves a model-supplied command name: exact, then prefix, then close spelling.
    pub fn resolve_name(&self, raw: &str) -> Option<CommandKind> {
        let want = normalize_key(raw);
        if want.is_empty() {
            return None;
        }

        if let Ok(command) = raw.parse::<CommandKind>() {
            if self.route(command).is_some() {
                return Some(command);
            }
        }

        let known = || self.routes.iter().map(|route| route.command);

        if let Some(command) = known().find(|c| normalize_key(c.as_str()) == want) {
            return Some(command);
        }
        if let Some(command) = known().find(|c| normalize_key(c.as_str()).starts_with(&want)) {
            return Some(command);
        }

        let mut best: Option<(CommandKind, usize)> = None;
        for command in known() {
            let distance = strsim::levenshtein(&want, &normalize_key(command.as_str()));
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((command, distance));
            }
        }
        best.filter(|(_, distance)| *distance <= 3)
            .map(|(command, _)| command)
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        format!("{base}/")
    } else {
        format!("{base}/{path}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    Command { command: CommandKind },
    Question { text: String },
    Unknown,
}

impl Intent {
    pub fn question(text: impl Into<String>) -> Self {
        Intent::Question { text: text.into() }
    }

    pub fn command(command: CommandKind) -> Self {
        Intent::Command { command }
    }
}

static RE_QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        ^\s*
        (?:what|why|how|when|where|who|whose|which
          |is|are|was|were|does|do|did|can|could|would|will|should
          |tell\s+me|explain)
        \b",
    )
    .unwrap()
});

static RE_IMPERATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:go|take\s+me|navigate|open|show\s+me|bring\s+me|visit|switch)\b").unwrap()
});

const SYSTEM_PROMPT: &str = "You route utterances spoken during a live product demo. \
Decide whether the utterance is a navigation command from the list below or a question to answer. \
Reply with JSON only: {\"intent\": \"command\", \"command\": \"<name>\"} or {\"intent\": \"question\"}. \
If you cannot tell, reply {\"intent\": \"unknown\"}.";

/// Maps utterances onto [`Intent`]s. Consults the language model first and
/// falls back to keyword matching; never fails.
#[derive(Clone)]
pub struct IntentClassifier {
    provider: Option<Arc<dyn LLMProvider>>,
    config: ClassifierConfig,
}

impl fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentClassifier")
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .field("config", &self.config)
            .finish()
    }
}

impl IntentClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>, config: ClassifierConfig) -> Self {
        Self {
            provider: Some(provider),
            config,
        }
    }

    pub fn keyword_only() -> Self {
        Self {
            provider: None,
            config: ClassifierConfig::default(),
        }
    }

    pub async fn classify(&self, utterance: &str, vocabulary: &Vocabulary) -> Intent {
        let text = utterance.trim();
        if text.is_empty() {
            return Intent::Unknown;
        }

        if let Some(provider) = &self.provider {
            let request = self.build_request(text, vocabulary);
            match time::timeout(self.config.timeout, provider.complete(request)).await {
                Ok(Ok(response)) => {
                    let reply = response.message.text().unwrap_or_default();
                    match parse_model_reply(reply, text, vocabulary) {
                        Some(intent) => {
                            debug!(?intent, "intent resolved by language model");
                            return intent;
                        }
                        None => debug!(reply, "language model reply inconclusive"),
                    }
                }
                Ok(Err(err)) => log_provider_failure(&err),
                Err(_) => warn!(
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "intent model timed out"
                ),
            }
        }

        let intent = Self::fallback(text, vocabulary);
        debug!(?intent, "intent resolved by keyword fallback");
        intent
    }

    /// Deterministic keyword rules. Unmatched input is treated as a question.
    pub fn fallback(utterance: &str, vocabulary: &Vocabulary) -> Intent {
        let text = utterance.trim();
        if text.is_empty() {
            return Intent::Unknown;
        }

        let route = vocabulary.match_keywords(text);
        let interrogative = RE_QUESTION.is_match(text) || text.ends_with('?');

        match route {
            Some(route) if RE_IMPERATIVE.is_match(text) || !interrogative => {
                Intent::command(route.command())
            }
            _ => Intent::question(text),
        }
    }

    fn build_request(&self, utterance: &str, vocabulary: &Vocabulary) -> CompletionRequest {
        let commands: Vec<String> = vocabulary
            .routes()
            .iter()
            .map(|route| format!("- {}: {}", route.command(), route.command().description()))
            .collect();

        CompletionRequest::new(
            self.config.model.clone(),
            vec![
                ChatMessage::system(format!("{SYSTEM_PROMPT}\n\nCommands:\n{}", commands.join("\n"))),
                ChatMessage::user(utterance.to_string()),
            ],
        )
        .with_max_tokens(60)
        .with_temperature(0.0)
    }
}

fn log_provider_failure(err: &LLMError) {
    warn!(error = %err, "intent model failed; using keyword fallback");
}

#[derive(Debug, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
enum IntentEnvelope {
    #[serde(alias = "navigate", alias = "navigation", alias = "action")]
    Command {
        #[serde(default, alias = "name", alias = "target", alias = "page")]
        command: Option<String>,
    },
    #[serde(alias = "ask", alias = "query")]
    Question {},
    #[serde(other)]
    Unknown,
}

/// `None` means the reply was empty, unparseable or inconclusive.
fn parse_model_reply(content: &str, utterance: &str, vocabulary: &Vocabulary) -> Option<Intent> {
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    let envelope = serde_json::from_str::<IntentEnvelope>(content)
        .ok()
        .or_else(|| {
            extract_json_from_fenced_block(content)
                .and_then(|json| serde_json::from_str::<IntentEnvelope>(&json).ok())
        })
        .or_else(|| {
            extract_json_from_mixed_content(content)
                .and_then(|json| serde_json::from_str::<IntentEnvelope>(&json).ok())
        })?;

    match envelope {
        IntentEnvelope::Command { command } => command
            .and_then(|name| vocabulary.resolve_name(&name))
            .map(Intent::command),
        IntentEnvelope::Question {} => Some(Intent::question(utterance)),
        IntentEnvelope::Unknown => None,
    }
}

fn extract_json_from_fenced_block(content: &str) -> Option<String> {
    let start = content.find("```json").or_else(|| content.find("```"))?;
    let remainder = &content[start..];
    let after_language = remainder.find('\n')?;
    let body = &remainder[after_language + 1..];
    let end = body.find("```")?;
    Some(body[..end].trim().to_string())
}

// Quote/escape-aware: last complete top-level object mentioning "intent".
fn extract_json_from_mixed_content(content: &str) -> Option<String> {
    let bytes = content.as_bytes();
    let mut start_pos = None;
    let mut end_pos = None;
    let mut depth: i32 = 0;

    let mut in_str = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_str {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_str = false;
            }
            continue;
        } else if b == b'"' {
            in_str = true;
            continue;
        }

        match b {
            b'{' => {
                if depth == 0 {
                    start_pos = Some(i);
                }
                depth += 1;
            }
            b'}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 && start_pos.is_some() {
                        end_pos = Some(i + 1);
                    }
                }
            }
            _ => {}
        }
    }

    let (s, e) = (start_pos?, end_pos?);
    if e <= s {
        return None;
    }
    let candidate = &content[s..e];
    candidate
        .contains("\"intent\"")
        .then(|| candidate.to_string())
}
