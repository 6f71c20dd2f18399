// SPDX-License-Identifier: MIT
//! Wire protocol spoken to the companion process.
//!
//! Two message shapes, both UTF-8 JSON with camelCase field names:
//!
//! - [`FileMessage`] — a tracked file appeared (`add-file`) or disappeared
//!   (`drop-file`). Renames are expressed as a drop followed by an add;
//!   the companion never needs a third message type.
//! - [`InitMessage`] — sent once per successful connect: the snapshot of
//!   all currently-open, in-workspace files at that instant.
//!
//! Every message travels inside the named-event envelope
//! `{"event": "message", "data": <payload>}`; inbound frames use the same
//! envelope. Paths in outgoing messages are workspace-relative and
//! separator-normalized for the host OS — normalization happens when a
//! message is emitted, never on the internal paths used for comparison.

use serde::{Deserialize, Serialize};

use crate::paths;

/// The single named event all payloads are sent (and received) under.
pub const EVENT_NAME: &str = "message";

/// What happened to a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileAction {
    AddFile,
    DropFile,
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddFile => write!(f, "add-file"),
            Self::DropFile => write!(f, "drop-file"),
        }
    }
}

/// A single tracked-file event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMessage {
    pub action: FileAction,
    /// Workspace-relative path, `/`-separated until wire normalization.
    pub path: String,
    /// Absolute workspace root, used by the supervisor to route the
    /// message to the right connection.
    pub base_dir: String,
    /// Constant identifying the originating editor integration.
    pub source_type: String,
}

impl FileMessage {
    pub fn add(path: impl Into<String>, base_dir: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            action: FileAction::AddFile,
            path: path.into(),
            base_dir: base_dir.into(),
            source_type: source_type.into(),
        }
    }

    pub fn drop(path: impl Into<String>, base_dir: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            action: FileAction::DropFile,
            path: path.into(),
            base_dir: base_dir.into(),
            source_type: source_type.into(),
        }
    }

    /// Separator-normalized copy for emission. Internal routing keeps the
    /// original form; only the emitted copy is rewritten.
    pub fn for_wire(&self, separator: char) -> Self {
        Self {
            action: self.action,
            path: paths::normalize_separators(&self.path, separator),
            base_dir: paths::normalize_separators(&self.base_dir, separator),
            source_type: self.source_type.clone(),
        }
    }
}

/// One entry of the connect-time snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextFile {
    pub path: String,
    pub source_type: String,
}

/// Snapshot of the open-file context, sent once per successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    pub action: String,
    pub base_dir: String,
    pub context_files: Vec<ContextFile>,
}

impl InitMessage {
    pub fn new(base_dir: impl Into<String>, context_files: Vec<ContextFile>) -> Self {
        Self {
            action: "init".to_string(),
            base_dir: base_dir.into(),
            context_files,
        }
    }
}

/// Wrap a payload in the named-event envelope and serialize it to the
/// JSON text frame that goes on the wire.
pub fn envelope(payload: &impl Serialize) -> Result<String, serde_json::Error> {
    let data = serde_json::to_value(payload)?;
    serde_json::to_string(&serde_json::json!({
        "event": EVENT_NAME,
        "data": data,
    }))
}
