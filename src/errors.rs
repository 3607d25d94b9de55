//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Agent executable could not be located.
    Unavailable(String),
    /// Agent executable was found but the process failed to launch.
    Spawn(String),
    /// Operation on a session that was never started or has already closed.
    SessionNotStarted(String),
    /// A prompt was sent while the previous turn's stream is still open.
    TurnInProgress(String),
    /// Wire protocol violation that cannot be represented as an event.
    Protocol(String),
    /// Hosted endpoint answered with a non-success status.
    Api(u16, String),
    /// Transport failure talking to the hosted endpoint.
    Http(String),
    /// Fallback request timeout or agent idle watchdog expiry.
    Timeout(String),
    /// The agent itself reported a failed turn (`is_error = true`).
    AgentReported(String),
    /// The agent process exited with a failure status mid-turn.
    AgentExited(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error means the local agent path cannot be used at all.
    ///
    /// Unavailable errors are non-fatal: the orchestrator falls back to the
    /// hosted endpoint instead of surfacing them.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Spawn(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::SessionNotStarted(msg) => write!(f, "session not started: {msg}"),
            Self::TurnInProgress(msg) => write!(f, "turn in progress: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Api(status, msg) => write!(f, "api error {status}: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::AgentReported(msg) => write!(f, "agent reported an error: {msg}"),
            Self::AgentExited(msg) => write!(f, "agent exited: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("fallback request timed out: {err}"))
        } else {
            Self::Http(err.to_string())
        }
    }
}
