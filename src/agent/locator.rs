//! Agent executable discovery.
//!
//! Probe order:
//! 1. The bundled script shipped with the application.
//! 2. A fixed list of well-known install directories.
//! 3. `PATH` lookup via [`which`].
//!
//! The first candidate that exists and can be opened for reading wins.
//! Probing has no side effects; a miss only means "fallback only".

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::AgentConfig;

/// How the resolved executable must be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableKind {
    /// A script run through the configured interpreter.
    BundledScript,
    /// A native binary (or shim) executed directly.
    InstalledBinary,
}

/// Resolved agent executable. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentExecutable {
    /// Absolute path of the script or binary.
    pub path: PathBuf,
    /// Launch style.
    pub kind: ExecutableKind,
}

/// Filesystem probe for the agent executable.
#[derive(Debug, Clone)]
pub struct Locator {
    binary_name: String,
    bundled_script: Option<PathBuf>,
    install_dirs: Vec<PathBuf>,
    search_path: Option<OsString>,
}

impl Locator {
    /// Build a locator from the `[agent]` configuration section.
    ///
    /// `PATH` discovery uses the process environment.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            binary_name: config.binary_name.clone(),
            bundled_script: config.bundled_script.clone(),
            install_dirs: config.install_dirs.clone(),
            search_path: None,
        }
    }

    /// Build a locator with explicit probe locations.
    #[must_use]
    pub fn new(
        binary_name: impl Into<String>,
        bundled_script: Option<PathBuf>,
        install_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            binary_name: binary_name.into(),
            bundled_script,
            install_dirs,
            search_path: None,
        }
    }

    /// Override the `PATH`-style search list used in the final probe step.
    #[must_use]
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// Resolve the agent executable, or `None` when no candidate exists.
    #[must_use]
    pub fn resolve(&self) -> Option<AgentExecutable> {
        if let Some(script) = self.bundled_script.as_deref() {
            if is_readable_file(script) {
                info!(path = %script.display(), "using bundled agent script");
                return Some(AgentExecutable {
                    path: script.to_path_buf(),
                    kind: ExecutableKind::BundledScript,
                });
            }
            debug!(path = %script.display(), "bundled agent script not present");
        }

        for dir in &self.install_dirs {
            let candidate = dir.join(&self.binary_name);
            if is_readable_file(&candidate) {
                info!(path = %candidate.display(), "using installed agent binary");
                return Some(AgentExecutable {
                    path: candidate,
                    kind: ExecutableKind::InstalledBinary,
                });
            }
        }

        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                which::which_in(&self.binary_name, Some(paths), cwd)
            }
            None => which::which(&self.binary_name),
        };

        match found {
            Ok(path) if is_readable_file(&path) => {
                info!(path = %path.display(), "using agent binary from PATH");
                Some(AgentExecutable {
                    path,
                    kind: ExecutableKind::InstalledBinary,
                })
            }
            Ok(path) => {
                debug!(path = %path.display(), "PATH candidate is not readable");
                None
            }
            Err(err) => {
                info!(binary = self.binary_name, %err, "agent executable not found; fallback only");
                None
            }
        }
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}
