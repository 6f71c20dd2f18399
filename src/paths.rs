// SPDX-License-Identifier: MIT
//! Path translation: absolute filesystem paths → workspace-relative,
//! wire-normalized form, plus the exclusion rules deciding which files are
//! representable in messages at all.
//!
//! Exclusion rules, checked before relativizing: not a regular file,
//! classified binary (NUL byte in the first 8 KiB), outside the workspace
//! root, or matched by the workspace's source-control ignore rules.
//! Excluded paths never appear in any message.

use std::io::Read;
use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};

/// How many leading bytes are sniffed for the binary classification.
const BINARY_SNIFF_BYTES: usize = 8192;

/// Per-workspace path scope: the absolute root plus the ignore matcher
/// built from the workspace's `.gitignore` at registration time.
pub struct WorkspaceScope {
    base_path: PathBuf,
    base_dir: String,
    gitignore: Gitignore,
}

impl WorkspaceScope {
    pub fn new(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            base_dir: base_path.to_string_lossy().into_owned(),
            gitignore: build_gitignore(base_path),
        }
    }

    /// The absolute workspace root in the string form used on the wire
    /// (pre-normalization) and for message routing.
    pub fn base_dir(&self) -> &str {
        &self.base_dir
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Component-wise prefix check — `/a/bc` is not under `/a/b`.
    pub fn contains(&self, abs: &Path) -> bool {
        abs.starts_with(&self.base_path)
    }

    /// Workspace-relative, `/`-joined path. `None` when the path is not
    /// under the root, or when relativization fails despite the prefix
    /// check passing (logged, never raised).
    pub fn relative(&self, abs: &Path) -> Option<String> {
        if !self.contains(abs) {
            return None;
        }
        match abs.strip_prefix(&self.base_path) {
            Ok(rel) => Some(
                rel.iter()
                    .map(|c| c.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            ),
            Err(_) => {
                warn!(
                    path = %abs.display(),
                    base = %self.base_dir,
                    "path passed prefix check but could not be relativized — excluding"
                );
                None
            }
        }
    }

    /// True when the workspace's source-control ignore rules match the
    /// path or any of its parent directories.
    pub fn is_ignored(&self, abs: &Path) -> bool {
        self.gitignore
            .matched_path_or_any_parents(abs, abs.is_dir())
            .is_ignore()
    }

    /// Full translation contract: `Some(relative)` only for a regular,
    /// non-binary, in-workspace, non-ignored file.
    pub fn admissible(&self, abs: &Path) -> Option<String> {
        if !is_regular_file(abs) || is_binary(abs) {
            return None;
        }
        if self.is_ignored(abs) {
            debug!(path = %abs.display(), "excluded by ignore rules");
            return None;
        }
        self.relative(abs)
    }
}

/// Build the per-workspace gitignore matcher from `<root>/.gitignore`.
/// Missing or unreadable rules degrade to an empty matcher.
fn build_gitignore(base_path: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(base_path);
    let gitignore_path = base_path.join(".gitignore");

    if gitignore_path.exists() {
        if let Some(err) = builder.add(&gitignore_path) {
            warn!(path = %gitignore_path.display(), error = %err, "failed to load .gitignore");
        }
    }

    match builder.build() {
        Ok(gi) => gi,
        Err(e) => {
            warn!(error = %e, "failed to build gitignore matcher — ignore rules disabled");
            Gitignore::empty()
        }
    }
}

/// Regular-file check; symlink targets count, directories and specials
/// do not.
pub fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Content sniff: a NUL byte within the first 8 KiB classifies the file as
/// binary. An unreadable file is treated as binary (excluded).
pub fn is_binary(path: &Path) -> bool {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot read file for binary sniff — excluding");
            return true;
        }
    };
    let mut buf = [0u8; BINARY_SNIFF_BYTES];
    match file.read(&mut buf) {
        Ok(n) => buf[..n].contains(&0),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "binary sniff read failed — excluding");
            true
        }
    }
}

/// The separator outgoing messages are normalized to on this platform.
pub fn host_separator() -> char {
    std::path::MAIN_SEPARATOR
}

/// Rewrite `/` to `\` when the target separator is `\`; identity
/// otherwise. Applied to every emitted `path` and `baseDir`, never to the
/// internal filesystem paths used for comparison.
pub fn normalize_separators(s: &str, separator: char) -> String {
    if separator == '\\' {
        s.replace('/', "\\")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scope(dir: &TempDir) -> WorkspaceScope {
        WorkspaceScope::new(dir.path())
    }

    #[test]
    fn relative_joins_with_forward_slashes() {
        let dir = TempDir::new().unwrap();
        let s = scope(&dir);
        let abs = dir.path().join("src").join("main.rs");
        assert_eq!(s.relative(&abs).unwrap(), "src/main.rs");
    }

    #[test]
    fn outside_workspace_is_not_relativized() {
        let dir = TempDir::new().unwrap();
        let s = scope(&dir);
        assert_eq!(s.relative(Path::new("/somewhere/else.txt")), None);
    }

    #[test]
    fn prefix_check_is_component_wise() {
        let s = WorkspaceScope::new(Path::new("/a/b"));
        assert!(!s.contains(Path::new("/a/bc/file.txt")));
        assert!(s.contains(Path::new("/a/b/file.txt")));
    }

    #[test]
    fn text_file_is_admissible() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        let s = scope(&dir);
        assert_eq!(
            s.admissible(&dir.path().join("notes.txt")).unwrap(),
            "notes.txt"
        );
    }

    #[test]
    fn binary_file_is_excluded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("blob.bin"), b"\x00\x01\x02rest").unwrap();
        let s = scope(&dir);
        assert!(is_binary(&dir.path().join("blob.bin")));
        assert_eq!(s.admissible(&dir.path().join("blob.bin")), None);
    }

    #[test]
    fn missing_file_is_excluded() {
        let dir = TempDir::new().unwrap();
        let s = scope(&dir);
        assert_eq!(s.admissible(&dir.path().join("nope.txt")), None);
    }

    #[test]
    fn directory_is_not_a_regular_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(!is_regular_file(&dir.path().join("sub")));
    }

    #[test]
    fn gitignore_rules_exclude_matched_paths() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "target/\n*.log\n").unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target").join("out.txt"), "x").unwrap();
        fs::write(dir.path().join("build.log"), "x").unwrap();
        fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();

        let s = scope(&dir);
        assert!(s.is_ignored(&dir.path().join("target").join("out.txt")));
        assert!(s.is_ignored(&dir.path().join("build.log")));
        assert!(!s.is_ignored(&dir.path().join("main.rs")));

        assert_eq!(s.admissible(&dir.path().join("build.log")), None);
        assert_eq!(
            s.admissible(&dir.path().join("main.rs")).unwrap(),
            "main.rs"
        );
    }

    #[test]
    fn normalize_rewrites_only_for_backslash_target() {
        assert_eq!(normalize_separators("a/b/c.txt", '\\'), "a\\b\\c.txt");
        assert_eq!(normalize_separators("a/b/c.txt", '/'), "a/b/c.txt");
    }
}
