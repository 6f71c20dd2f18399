// SPDX-License-Identifier: MIT
//! Event diff engine: turns a raw rename-or-move notification into zero,
//! one, or two [`FileMessage`]s.
//!
//! A rename is never forwarded as a rename. The companion process only
//! understands "a tracked file appeared" / "a tracked file disappeared",
//! so a path change becomes a `drop-file` for the old relative path
//! followed by an `add-file` for the new one — drop always precedes add,
//! and either half is omitted when that end of the move lies outside the
//! workspace.

use std::path::Path;

use tracing::debug;

use crate::paths::{self, WorkspaceScope};
use crate::protocol::FileMessage;

/// Translate a path-change notification `(old_abs → new_abs)` into the
/// messages to send, in order.
///
/// `file_open` is whether the file, at its new path, is currently open in
/// the host editor. Closed files produce nothing here — the open/close
/// notifications are the sole source of add/drop for them.
pub fn plan_path_change(
    scope: &WorkspaceScope,
    source_type: &str,
    file_open: bool,
    old_abs: &Path,
    new_abs: &Path,
) -> Vec<FileMessage> {
    // The file now lives at the new path; reject anything that is not a
    // regular text file there.
    if !paths::is_regular_file(new_abs) || paths::is_binary(new_abs) {
        debug!(path = %new_abs.display(), "path change for non-regular or binary file — skipping");
        return Vec::new();
    }

    let old_in = scope.contains(old_abs);
    let new_in = scope.contains(new_abs);
    if !old_in && !new_in {
        // Entirely outside workspace scope.
        return Vec::new();
    }

    if !file_open {
        debug!(path = %new_abs.display(), "path change for file not open in editor — skipping");
        return Vec::new();
    }

    let old_rel = if old_in && !scope.is_ignored(old_abs) {
        scope.relative(old_abs)
    } else {
        None
    };
    let new_rel = if new_in && !scope.is_ignored(new_abs) {
        scope.relative(new_abs)
    } else {
        None
    };

    if old_rel == new_rel {
        // Pure no-op rename (e.g. a metadata-only touch).
        return Vec::new();
    }

    let mut messages = Vec::with_capacity(2);
    if let Some(old_rel) = old_rel {
        messages.push(FileMessage::drop(old_rel, scope.base_dir(), source_type));
    }
    if let Some(new_rel) = new_rel {
        messages.push(FileMessage::add(new_rel, scope.base_dir(), source_type));
    }
    messages
}
