//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::options::{PermissionMode, SessionOptions};
use crate::{AppError, Result};

/// Keychain service under which the fallback API key is stored.
pub const KEYRING_SERVICE: &str = "agent-conduit";

/// Keychain entry name for the fallback API key.
pub const KEYRING_API_KEY: &str = "anthropic_api_key";

/// Environment variable consulted when the keychain has no API key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// How prompts are framed on the agent's stdin.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StdinFormat {
    /// Raw prompt text followed by a newline. Interior line breaks are
    /// folded to spaces so one prompt always occupies one line.
    #[default]
    Line,
    /// A single-line JSON object `{"type":"user","content":…}`.
    Json,
}

/// Local agent discovery and launch settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct AgentConfig {
    /// Executable name looked up in install directories and on `PATH`.
    pub binary_name: String,
    /// Script shipped alongside the application, probed first.
    pub bundled_script: Option<PathBuf>,
    /// Interpreter used to run the bundled script.
    pub script_interpreter: String,
    /// Well-known install directories probed after the bundled script.
    pub install_dirs: Vec<PathBuf>,
    /// System prompt handed to the agent (and to the fallback endpoint).
    pub system_prompt: Option<String>,
    /// Tools the agent may use without asking.
    pub allowed_tools: Vec<String>,
    /// Tool permission mode.
    pub permission_mode: PermissionMode,
    /// Model override for the agent.
    pub model: Option<String>,
    /// Working directory; defaults to the process's current directory.
    pub working_directory: Option<PathBuf>,
    /// Extra CLI arguments appended after the derived flags.
    pub extra_args: Vec<String>,
    /// Seconds of stdout silence during a turn before the stream is failed; 0 disables.
    pub idle_timeout_seconds: u64,
    /// Seconds to wait after an interrupt before forcibly stopping the session.
    pub interrupt_grace_seconds: u64,
    /// Number of recent stderr lines kept for diagnostics.
    pub stderr_tail_lines: usize,
    /// Framing of prompts written to stdin.
    pub stdin_format: StdinFormat,
    /// Files whose presence indicates the agent is logged in.
    pub credential_paths: Vec<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_name: "claude".into(),
            bundled_script: None,
            script_interpreter: "node".into(),
            install_dirs: default_install_dirs(),
            system_prompt: None,
            allowed_tools: Vec::new(),
            permission_mode: PermissionMode::Default,
            model: None,
            working_directory: None,
            extra_args: Vec::new(),
            idle_timeout_seconds: 300,
            interrupt_grace_seconds: 5,
            stderr_tail_lines: 50,
            stdin_format: StdinFormat::Line,
            credential_paths: vec![expand_home(Path::new("~/.claude/.credentials.json"))],
        }
    }
}

fn default_install_dirs() -> Vec<PathBuf> {
    [
        "~/.claude/local",
        "~/.local/bin",
        "~/.npm-global/bin",
        "/usr/local/bin",
        "/opt/homebrew/bin",
    ]
    .iter()
    .map(|dir| expand_home(Path::new(dir)))
    .collect()
}

/// Hosted completion endpoint settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct FallbackConfig {
    /// Messages endpoint URL.
    pub endpoint: String,
    /// Model requested from the endpoint.
    pub model: String,
    /// Completion token ceiling.
    pub max_tokens: u32,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Value of the `anthropic-version` header.
    pub api_version: String,
    /// API key (populated at runtime, never read from TOML).
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.anthropic.com/v1/messages".into(),
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 4096,
            timeout_seconds: 120,
            api_version: "2023-06-01".into(),
            api_key: None,
        }
    }
}

/// Ceilings applied when serializing caller context into a prompt.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ContextLimits {
    /// Character ceiling when exactly one item is attached.
    pub single_item_chars: usize,
    /// Per-item character ceiling when several items are attached.
    pub multi_item_chars: usize,
    /// Maximum folder child names listed per item.
    pub max_child_names: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            single_item_chars: 50_000,
            multi_item_chars: 30_000,
            max_child_names: 50,
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// Local agent settings.
    pub agent: AgentConfig,
    /// Hosted fallback settings.
    pub fallback: FallbackConfig,
    /// Prompt context ceilings.
    pub context: ContextLimits,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string, expand `~` paths, and validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the fallback API key from the OS keychain with env-var fallback.
    ///
    /// A missing key is not an error: the fallback client answers with
    /// setup guidance instead of calling the endpoint.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.fallback.api_key = load_credential(KEYRING_API_KEY, API_KEY_ENV).await?;
        Ok(())
    }

    /// Session options derived from the `[agent]` section.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        let working_directory = self
            .agent
            .working_directory
            .clone()
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        SessionOptions {
            system_prompt: self.agent.system_prompt.clone(),
            allowed_tools: self.agent.allowed_tools.clone(),
            permission_mode: self.agent.permission_mode,
            model: self.agent.model.clone(),
            working_directory,
            extra_args: self.agent.extra_args.clone(),
        }
    }

    /// Idle watchdog threshold, or `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.agent.idle_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.agent.idle_timeout_seconds))
    }

    fn validate(&mut self) -> Result<()> {
        if self.agent.binary_name.trim().is_empty() {
            return Err(AppError::Config("agent.binary_name must not be empty".into()));
        }

        if self.context.single_item_chars == 0 || self.context.multi_item_chars == 0 {
            return Err(AppError::Config(
                "context character ceilings must be greater than zero".into(),
            ));
        }

        if self.context.multi_item_chars > self.context.single_item_chars {
            return Err(AppError::Config(
                "context.multi_item_chars must not exceed context.single_item_chars".into(),
            ));
        }

        if self.fallback.timeout_seconds == 0 {
            return Err(AppError::Config(
                "fallback.timeout_seconds must be greater than zero".into(),
            ));
        }

        self.agent.bundled_script = self.agent.bundled_script.as_deref().map(expand_home);
        self.agent.install_dirs = self.agent.install_dirs.iter().map(|d| expand_home(d)).collect();
        self.agent.credential_paths = self
            .agent
            .credential_paths
            .iter()
            .map(|p| expand_home(p))
            .collect();
        self.agent.working_directory = self.agent.working_directory.as_deref().map(expand_home);

        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~`, or hosts without a resolvable home, are
/// returned unchanged.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            debug!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    Ok(env::var(env_key).ok().filter(|v| !v.trim().is_empty()))
}
