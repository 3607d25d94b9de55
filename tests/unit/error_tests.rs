//! Unit tests for `AppError` display and classification.

use agent_conduit::AppError;

#[test]
fn display_prefixes_category() {
    assert_eq!(AppError::Config("bad".into()).to_string(), "config: bad");
    assert_eq!(AppError::Spawn("nope".into()).to_string(), "spawn: nope");
    assert_eq!(
        AppError::Api(429, "slow down".into()).to_string(),
        "api error 429: slow down"
    );
    assert_eq!(AppError::Timeout("30s".into()).to_string(), "timeout: 30s");
}

#[test]
fn agent_reported_failure_mentions_error() {
    let err = AppError::AgentReported("turn failed".into());
    assert!(err.to_string().contains("error"));
}

#[test]
fn unavailable_covers_missing_and_unlaunchable_agent() {
    assert!(AppError::Unavailable("x".into()).is_unavailable());
    assert!(AppError::Spawn("x".into()).is_unavailable());
    assert!(!AppError::AgentExited("x".into()).is_unavailable());
    assert!(!AppError::AgentReported("x".into()).is_unavailable());
}

#[test]
fn io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn toml_error_converts_to_config() {
    let parse = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err: AppError = parse.into();
    assert!(matches!(err, AppError::Config(_)));
}
