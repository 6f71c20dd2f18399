// SPDX-License-Identifier: MIT
//! Workspace identity.
//!
//! A workspace is one open project/editing root in the host editor — the
//! unit of connection supervision. The host owns the workspace's lifecycle;
//! this crate only holds identity plus the absolute root path used for
//! relativizing file paths.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Stable, opaque workspace identity, derived from the workspace root path.
///
/// Stays valid for the workspace's lifetime and is used as the key in every
/// supervisor map and in status events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One open project/editing root.
#[derive(Debug, Clone)]
pub struct Workspace {
    id: WorkspaceId,
    name: String,
    base_path: PathBuf,
}

impl Workspace {
    /// Build a workspace from its absolute root path. The display name is
    /// the final path component (or the whole path when there is none).
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let name = base_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| base_path.to_string_lossy().into_owned());
        let id = WorkspaceId(base_path.to_string_lossy().into_owned());
        Self {
            id,
            name,
            base_path,
        }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    /// Short human-readable name for logging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute filesystem root used for relativizing paths.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
