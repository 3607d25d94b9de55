//! Launch options for an agent session.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How much autonomy the agent has when invoking tools.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Ask before every sensitive tool call.
    #[default]
    Default,
    /// Apply file edits without asking.
    AcceptEdits,
    /// Plan only; do not modify anything.
    Plan,
    /// Skip every permission prompt.
    BypassPermissions,
}

impl PermissionMode {
    /// Flag value understood by the agent CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options a session is started with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// System prompt appended to the agent's own.
    pub system_prompt: Option<String>,
    /// Tools the agent may call without asking.
    pub allowed_tools: Vec<String>,
    /// Permission mode for tool calls.
    pub permission_mode: PermissionMode,
    /// Model override.
    pub model: Option<String>,
    /// Directory the agent works in.
    pub working_directory: PathBuf,
    /// Extra arguments appended verbatim after the derived flags.
    pub extra_args: Vec<String>,
}

impl SessionOptions {
    /// Derive the agent argument list from these options.
    ///
    /// Empty optional values are omitted entirely rather than passed as
    /// empty flags.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            args.push("--system-prompt".to_owned());
            args.push(prompt.to_owned());
        }

        if !self.allowed_tools.is_empty() {
            args.push("--allowed-tools".to_owned());
            args.push(self.allowed_tools.join(","));
        }

        args.push("--permission-mode".to_owned());
        args.push(self.permission_mode.as_str().to_owned());

        if let Some(model) = self.model.as_deref().filter(|m| !m.is_empty()) {
            args.push("--model".to_owned());
            args.push(model.to_owned());
        }

        args.push("--cwd".to_owned());
        args.push(self.working_directory.to_string_lossy().into_owned());

        args.extend(self.extra_args.iter().cloned());
        args
    }
}
