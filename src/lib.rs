#![forbid(unsafe_code)]

//! Conversational AI core backed by a locally installed agent CLI.
//!
//! The [`orchestrator::Orchestrator`] runs the agent as a long-lived
//! subprocess, decodes its newline-delimited JSON output into typed
//! [`agent::Event`]s, and falls back to a hosted completion endpoint when
//! no agent is installed.

pub mod agent;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod models;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
