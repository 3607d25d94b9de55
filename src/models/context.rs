//! Caller-supplied context descriptors attached to a question.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Read-only snapshot of a file or folder the user is looking at.
///
/// Supplied per call by the UI layer; the core never mutates it. Folders
/// carry the names of their first few children instead of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Context {
    /// Display name (usually the file or folder name).
    pub name: String,
    /// Full path of the item.
    pub path: PathBuf,
    /// Whether the item is a folder.
    pub is_folder: bool,
    /// Text content for files, when available.
    #[serde(default)]
    pub content: Option<String>,
    /// Names of the first children for folders.
    #[serde(default)]
    pub child_names: Option<Vec<String>>,
}

impl Context {
    /// Describe a file with its text content.
    #[must_use]
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_folder: false,
            content: Some(content.into()),
            child_names: None,
        }
    }

    /// Describe a folder by the names of its children.
    #[must_use]
    pub fn folder(name: impl Into<String>, path: impl Into<PathBuf>, child_names: Vec<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            is_folder: true,
            content: None,
            child_names: Some(child_names),
        }
    }
}
