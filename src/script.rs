use std::{
    collections::BTreeMap,
    fmt, fs,
    path::Path,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::LoadError,
    intent::{CommandKind, CommandRoute, Vocabulary},
};

pub const MIN_WAIT_SECONDS: u64 = 1;
pub const MAX_WAIT_SECONDS: u64 = 30;
pub const DEFAULT_WAIT_SECONDS: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    FillForm,
    Login,
    Showcase,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::FillForm => "fill_form",
            ActionKind::Login => "login",
            ActionKind::Showcase => "showcase",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect();

        match normalized.as_str() {
            "navigate" => Ok(ActionKind::Navigate),
            "click" => Ok(ActionKind::Click),
            "fillform" | "formfill" => Ok(ActionKind::FillForm),
            "login" | "signin" => Ok(ActionKind::Login),
            "showcase" => Ok(ActionKind::Showcase),
            _ => Err(value.to_string()),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoStep {
    name: String,
    description: Option<String>,
    target: String,
    action_kind: ActionKind,
    wait_seconds: u64,
    narration: String,
}

impl DemoStep {
    pub fn new(name: impl Into<String>, action_kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            target: target.into(),
            action_kind,
            wait_seconds: DEFAULT_WAIT_SECONDS,
            narration: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Out-of-range values are clamped into `MIN_WAIT_SECONDS..=MAX_WAIT_SECONDS`.
    pub fn with_wait_seconds(mut self, seconds: i64) -> Self {
        self.wait_seconds = clamp_wait(seconds);
        self
    }

    pub fn with_narration(mut self, narration: impl Into<String>) -> Self {
        self.narration = narration.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn action_kind(&self) -> ActionKind {
        self.action_kind
    }

    pub fn wait_seconds(&self) -> u64 {
        self.wait_seconds
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }

    pub fn narration(&self) -> &str {
        &self.narration
    }
}

fn clamp_wait(seconds: i64) -> u64 {
    seconds.clamp(MIN_WAIT_SECONDS as i64, MAX_WAIT_SECONDS as i64) as u64
}

#[derive(Debug, Clone, PartialEq)]
pub struct DemoScript {
    product_name: String,
    base_url: String,
    description: Option<String>,
    welcome_message: Option<String>,
    closing_message: Option<String>,
    login_credentials: Option<LoginCredentials>,
    steps: Vec<DemoStep>,
    vocabulary: Vocabulary,
}

impl DemoScript {
    /// Builds a script from code. Fails when `steps` is empty or a step has
    /// a blank name.
    pub fn new(
        product_name: impl Into<String>,
        base_url: impl Into<String>,
        steps: Vec<DemoStep>,
    ) -> Result<Self, LoadError> {
        if steps.is_empty() {
            return Err(LoadError::EmptySteps);
        }
        if let Some(index) = steps.iter().position(|step| step.name().trim().is_empty()) {
            return Err(LoadError::MissingField {
                context: format!("step {index}"),
                field: "name",
            });
        }
        let base_url = base_url.into();
        Ok(Self {
            product_name: product_name.into(),
            vocabulary: Vocabulary::for_base_url(&base_url),
            base_url,
            description: None,
            welcome_message: None,
            closing_message: None,
            login_credentials: None,
            steps,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_welcome_message(mut self, message: impl Into<String>) -> Self {
        self.welcome_message = Some(message.into());
        self
    }

    pub fn with_closing_message(mut self, message: impl Into<String>) -> Self {
        self.closing_message = Some(message.into());
        self
    }

    pub fn with_login_credentials(mut self, credentials: LoginCredentials) -> Self {
        self.login_credentials = Some(credentials);
        self
    }

    pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Validates raw configuration. Never returns a partially loaded script.
    pub fn load(raw: RawDemoConfig) -> Result<Self, LoadError> {
        let product_name = required(raw.product_name, "demo config", "product_name")?;
        let base_url = required(raw.base_url, "demo config", "base_url")?;

        let raw_steps = raw.steps.ok_or_else(|| LoadError::MissingField {
            context: "demo config".to_string(),
            field: "steps",
        })?;
        if raw_steps.is_empty() {
            return Err(LoadError::EmptySteps);
        }

        let steps = raw_steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| load_step(index, step))
            .collect::<Result<Vec<_>, _>>()?;

        let mut vocabulary = Vocabulary::for_base_url(&base_url);
        for (index, command) in raw.commands.into_iter().enumerate() {
            vocabulary.override_route(load_command(index, command)?);
        }

        Ok(Self {
            product_name,
            base_url,
            description: non_empty(raw.description),
            welcome_message: non_empty(raw.welcome_message),
            closing_message: non_empty(raw.closing_message),
            login_credentials: raw.login_credentials,
            steps,
            vocabulary,
        })
    }

    pub fn from_json_str(input: &str) -> Result<Self, LoadError> {
        Self::load(serde_json::from_str(input)?)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, LoadError> {
        Self::load(serde_yaml::from_str(input)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match format {
            ConfigFormat::Json => Self::from_json_str(&content),
            ConfigFormat::Yaml => Self::from_yaml_str(&content),
        }
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        let raw = self.to_config();
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Json => serde_json::to_string_pretty(&raw)?,
            ConfigFormat::Yaml => serde_yaml::to_string(&raw)?,
        };
        fs::write(path, content).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_config(&self) -> RawDemoConfig {
        let defaults = Vocabulary::for_base_url(&self.base_url);
        let commands = self
            .vocabulary
            .routes()
            .iter()
            .filter(|route| defaults.route(route.command()) != Some(*route))
            .map(|route| RawCommandRoute {
                command: route.command().as_str().to_string(),
                keywords: route.keywords().to_vec(),
                action_kind: Some(route.action_kind().as_str().to_string()),
                target: Some(route.target().to_string()),
            })
            .collect();

        RawDemoConfig {
            product_name: Some(self.product_name.clone()),
            base_url: Some(self.base_url.clone()),
            description: self.description.clone(),
            welcome_message: self.welcome_message.clone(),
            closing_message: self.closing_message.clone(),
            login_credentials: self.login_credentials.clone(),
            steps: Some(
                self.steps
                    .iter()
                    .map(|step| RawDemoStep {
                        name: Some(step.name.clone()),
                        description: step.description.clone(),
                        target: Some(step.target.clone()),
                        element_selector: None,
                        action_kind: Some(step.action_kind.as_str().to_string()),
                        wait_seconds: Some(step.wait_seconds as i64),
                        narration: Some(step.narration.clone()),
                    })
                    .collect(),
            ),
            commands,
        }
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn welcome_message(&self) -> Option<&str> {
        self.welcome_message.as_deref()
    }

    pub fn closing_message(&self) -> Option<&str> {
        self.closing_message.as_deref()
    }

    pub fn login_credentials(&self) -> Option<&LoginCredentials> {
        self.login_credentials.as_ref()
    }

    pub fn steps(&self) -> &[DemoStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&DemoStep> {
        self.steps.get(index)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }
}

fn required(
    value: Option<String>,
    context: impl Into<String>,
    field: &'static str,
) -> Result<String, LoadError> {
    non_empty(value).ok_or_else(|| LoadError::MissingField {
        context: context.into(),
        field,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn load_step(index: usize, raw: RawDemoStep) -> Result<DemoStep, LoadError> {
    let context = format!("step {index}");
    let name = required(raw.name, context.clone(), "name")?;

    let action_kind = match non_empty(raw.action_kind) {
        Some(value) => value
            .parse::<ActionKind>()
            .map_err(|value| LoadError::UnknownActionKind { index, value })?,
        None => ActionKind::Navigate,
    };

    let selector = non_empty(raw.element_selector);
    let target = match (action_kind, selector) {
        (ActionKind::Click, Some(selector)) => selector,
        (_, selector) => non_empty(raw.target)
            .or(selector)
            .ok_or(LoadError::MissingField {
                context,
                field: "target",
            })?,
    };

    let description = non_empty(raw.description);
    let narration = match raw.narration {
        Some(narration) => narration.trim().to_string(),
        None => description
            .as_deref()
            .map(|d| format!("Here's {name} - {d}"))
            .unwrap_or_default(),
    };

    Ok(DemoStep {
        wait_seconds: raw
            .wait_seconds
            .map(clamp_wait)
            .unwrap_or(DEFAULT_WAIT_SECONDS),
        name,
        description,
        target,
        action_kind,
        narration,
    })
}

fn load_command(index: usize, raw: RawCommandRoute) -> Result<CommandRoute, LoadError> {
    let command = raw
        .command
        .parse::<CommandKind>()
        .map_err(|value| LoadError::UnknownCommand { index, value })?;

    let action_kind = match non_empty(raw.action_kind) {
        Some(value) => value
            .parse::<ActionKind>()
            .map_err(|value| LoadError::UnknownActionKind { index, value })?,
        None => ActionKind::Navigate,
    };

    let target = required(raw.target, format!("command route {index}"), "target")?;
    let keywords = if raw.keywords.is_empty() {
        command.default_keywords().iter().map(|k| k.to_string()).collect()
    } else {
        raw.keywords
    };

    CommandRoute::new(command, keywords, action_kind, target)
        .map_err(|reason| LoadError::InvalidCommand { index, reason })
}

enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self, LoadError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            _ => Err(LoadError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDemoConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welcome_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_credentials: Option<LoginCredentials>,
    #[serde(default, alias = "demo_steps", skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<RawDemoStep>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<RawCommandRoute>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDemoStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_selector: Option<String>,
    #[serde(default, alias = "action_type", skip_serializing_if = "Option::is_none")]
    pub action_kind: Option<String>,
    #[serde(default, alias = "wait_time", skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<i64>,
    #[serde(default, alias = "voice_script", skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCommandRoute {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Default)]
pub struct ScriptCatalog {
    scripts: BTreeMap<String, Arc<DemoScript>>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slug(product_name: &str) -> String {
        product_name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn add(&mut self, script: DemoScript) -> String {
        let id = Self::slug(script.product_name());
        self.scripts.insert(id.clone(), Arc::new(script));
        id
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<String, LoadError> {
        Ok(self.add(DemoScript::load_from_file(path)?))
    }

    /// Loads every `.json`, `.yaml` and `.yml` file directly under `dir`,
    /// skipping anything else. Returns the ids in load order.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<Vec<String>, LoadError> {
        let dir = dir.as_ref();
        let io_error = |source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && ConfigFormat::from_path(&path).is_ok() {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|path| self.load_file(path)).collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<DemoScript>> {
        self.scripts.get(id).cloned()
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<DemoScript>> {
        self.scripts.remove(id)
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.scripts
            .iter()
            .map(|(id, script)| (id.clone(), script.product_name().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"{
        "product_name": "GIKI Transport",
        "base_url": "https://transport.example.edu/",
        "description": "Campus transport booking",
        "welcome_message": "Welcome!",
        "login_credentials": {"email": "demo@example.edu", "password": "secret"},
        "demo_steps": [
            {"name": "Homepage", "url": "https://transport.example.edu/", "action_type": "navigate",
             "voice_script": "Here is the homepage."},
            {"name": "Sign in", "description": "Secure sign-in", "target": "/auth/signin/",
             "action_kind": "login", "wait_seconds": 45},
            {"name": "Book", "action_kind": "click", "target": "/booking/",
             "element_selector": "#book-now", "wait_seconds": 0}
        ]
    }"##;

    #[test]
    fn loads_steps_in_authored_order() {
        let script = DemoScript::from_json_str(SAMPLE).expect("valid script");
        let names: Vec<_> = script.steps().iter().map(|s| s.name()).collect();
        assert_eq!(names, ["Homepage", "Sign in", "Book"]);
        assert_eq!(script.product_name(), "GIKI Transport");
        assert_eq!(script.steps()[0].action_kind(), ActionKind::Navigate);
        assert_eq!(script.steps()[1].action_kind(), ActionKind::Login);
    }

    #[test]
    fn clamps_wait_seconds_instead_of_rejecting() {
        let script = DemoScript::from_json_str(SAMPLE).unwrap();
        assert_eq!(script.steps()[0].wait_seconds(), DEFAULT_WAIT_SECONDS);
        assert_eq!(script.steps()[1].wait_seconds(), MAX_WAIT_SECONDS);
        assert_eq!(script.steps()[2].wait_seconds(), MIN_WAIT_SECONDS);
    }

    #[test]
    fn derives_narration_from_description() {
        let script = DemoScript::from_json_str(SAMPLE).unwrap();
        assert_eq!(script.steps()[0].narration(), "Here is the homepage.");
        assert_eq!(script.steps()[1].narration(), "Here's Sign in - Secure sign-in");
        assert_eq!(script.steps()[2].narration(), "");
    }

    #[test]
    fn click_steps_prefer_element_selector() {
        let script = DemoScript::from_json_str(SAMPLE).unwrap();
        assert_eq!(script.steps()[2].target(), "#book-now");
    }

    #[test]
    fn rejects_unknown_action_kind() {
        let raw = r#"{"product_name": "P", "base_url": "https://p",
            "steps": [{"name": "a", "target": "/", "action_kind": "teleport"}]}"#;
        match DemoScript::from_json_str(raw) {
            Err(LoadError::UnknownActionKind { index, value }) => {
                assert_eq!(index, 0);
                assert_eq!(value, "teleport");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_fields_and_empty_steps() {
        let no_name = r#"{"product_name": "P", "base_url": "https://p",
            "steps": [{"target": "/"}]}"#;
        assert!(matches!(
            DemoScript::from_json_str(no_name),
            Err(LoadError::MissingField { field: "name", .. })
        ));

        let no_target = r#"{"product_name": "P", "base_url": "https://p",
            "steps": [{"name": "a"}]}"#;
        assert!(matches!(
            DemoScript::from_json_str(no_target),
            Err(LoadError::MissingField { field: "target", .. })
        ));

        let no_base = r#"{"product_name": "P", "steps": [{"name": "a", "target": "/"}]}"#;
        assert!(matches!(
            DemoScript::from_json_str(no_base),
            Err(LoadError::MissingField { field: "base_url", .. })
        ));

        let empty = r#"{"product_name": "P", "base_url": "https://p", "steps": []}"#;
        assert!(matches!(
            DemoScript::from_json_str(empty),
            Err(LoadError::EmptySteps)
        ));
    }

    #[test]
    fn scripts_built_in_code_need_named_steps() {
        let steps = vec![
            DemoStep::new("Home", ActionKind::Navigate, "/"),
            DemoStep::new("  ", ActionKind::Click, "#go"),
        ];
        match DemoScript::new("P", "https://p", steps) {
            Err(LoadError::MissingField { context, field }) => {
                assert_eq!(context, "step 1");
                assert_eq!(field, "name");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn malformed_step_entry_is_a_load_error() {
        let raw = r#"{"product_name": "P", "base_url": "https://p",
            "steps": [{"name": "a", "target": "/", "wait_seconds": "soon"}]}"#;
        assert!(matches!(DemoScript::from_json_str(raw), Err(LoadError::Json(_))));
    }

    #[test]
    fn yaml_configs_load_with_command_overrides() {
        let yaml = r#"
product_name: Acme CRM
base_url: https://crm.example.com
steps:
  - name: Contacts
    target: /contacts
    wait_seconds: 2
commands:
  - command: check_profile
    keywords: ["settings", "my account"]
    target: https://crm.example.com/settings
"#;
        let script = DemoScript::from_yaml_str(yaml).expect("valid yaml");
        let route = script
            .vocabulary()
            .route(CommandKind::CheckProfile)
            .expect("route present");
        assert_eq!(route.target(), "https://crm.example.com/settings");
        assert!(route.matches("open my account please"));
    }

    #[test]
    fn unknown_command_override_is_rejected() {
        let yaml = r#"
product_name: Acme
base_url: https://acme.test
steps:
  - {name: Home, target: /}
commands:
  - {command: launch_rockets, target: /rockets}
"#;
        assert!(matches!(
            DemoScript::from_yaml_str(yaml),
            Err(LoadError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn config_round_trips_through_files() {
        let script = DemoScript::from_json_str(SAMPLE).unwrap();
        let dir = tempfile::tempdir().unwrap();

        for file in ["demo.json", "demo.yaml"] {
            let path = dir.path().join(file);
            script.save_to_file(&path).unwrap();
            let loaded = DemoScript::load_from_file(&path).unwrap();
            assert_eq!(loaded, script);
        }

        assert!(matches!(
            script.save_to_file(dir.path().join("demo.toml")),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn credentials_are_redacted_in_debug_output() {
        let script = DemoScript::from_json_str(SAMPLE).unwrap();
        let rendered = format!("{:?}", script.login_credentials().unwrap());
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn catalog_keys_scripts_by_slug() {
        let mut catalog = ScriptCatalog::new();
        let id = catalog.add(DemoScript::from_json_str(SAMPLE).unwrap());
        assert_eq!(id, "giki_transport");
        assert_eq!(
            catalog.list(),
            vec![("giki_transport".to_string(), "GIKI Transport".to_string())]
        );
        assert!(catalog.get("giki_transport").is_some());
        assert!(catalog.remove("giki_transport").is_some());
        assert!(catalog.get("giki_transport").is_none());
    }
}
