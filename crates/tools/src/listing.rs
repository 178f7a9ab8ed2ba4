//! `list_directory` and `find_files`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use convoke_core::error::ToolError;
use convoke_core::tool::ToolResult;
use convoke_security::AccessPolicy;
use ignore::WalkBuilder;
use tracing::debug;

use crate::file_access::{FIND_FILES, FileAccess, LIST_DIRECTORY};

/// Which entries `find_files` reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    #[default]
    Any,
}

impl EntryKind {
    fn accepts(&self, is_dir: bool) -> bool {
        match self {
            Self::File => !is_dir,
            Self::Dir => is_dir,
            Self::Any => true,
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" | "files" | "f" => Ok(Self::File),
            "dir" | "dirs" | "directory" | "d" => Ok(Self::Dir),
            "any" | "both" | "all" => Ok(Self::Any),
            other => Err(format!("expected 'file', 'dir' or 'any', got '{other}'")),
        }
    }
}

impl FileAccess {
    /// Sorted direct children of a directory; blacklisted entries are hidden.
    pub async fn list(&self, raw: &str) -> ToolResult {
        let path = match self.authorize(LIST_DIRECTORY, raw) {
            Ok(path) => path,
            Err(denied) => return denied,
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if !meta.is_dir() => {
                return ToolResult::error(format!("{raw} is not a directory; use read_file"));
            }
            Ok(_) => {}
            Err(e) => return ToolResult::error(format!("Cannot list {raw}: {e}")),
        }

        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) => return ToolResult::error(format!("Cannot list {raw}: {e}")),
        };

        let mut names = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return ToolResult::error(format!("Cannot list {raw}: {e}")),
            };
            let child = entry.path();
            if self.policy.blacklist_match(&child).is_some() {
                continue;
            }
            let is_dir = tokio::fs::metadata(&child).await.is_ok_and(|m| m.is_dir());
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if is_dir {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();

        if names.is_empty() {
            return ToolResult::ok(format!("{raw} is empty"));
        }
        ToolResult::ok(names.join("\n"))
    }

    /// Recursive search under `raw`, capped at the configured limit.
    ///
    /// A `pattern` containing `/` is matched against the path relative to
    /// the search root; otherwise against the entry name.
    pub async fn find(&self, raw: &str, pattern: Option<&str>, kind: EntryKind) -> Result<ToolResult, ToolError> {
        let root = match self.authorize(FIND_FILES, raw) {
            Ok(path) => path,
            Err(denied) => return Ok(denied),
        };
        if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
            return Ok(ToolResult::error(format!("{raw} is not a directory")));
        }

        let matcher = match pattern.map(glob::Pattern::new).transpose() {
            Ok(matcher) => matcher,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Invalid pattern '{}': {e}",
                    pattern.unwrap_or_default()
                )));
            }
        };

        let policy = Arc::clone(&self.policy);
        let limit = self.find_limit;
        let walk_root = root.clone();
        let found = tokio::task::spawn_blocking(move || walk(&policy, &walk_root, matcher.as_ref(), kind, limit))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: FIND_FILES.into(),
                reason: e.to_string(),
            })?;

        debug!(root = %root.display(), matches = found.paths.len(), truncated = found.truncated, "Find finished");

        if found.paths.is_empty() {
            return Ok(ToolResult::ok(format!("No matches under {raw}")));
        }

        let mut lines: Vec<String> = found
            .paths
            .iter()
            .map(|(path, is_dir)| {
                let mut shown = self.display(path);
                if *is_dir {
                    shown.push('/');
                }
                shown
            })
            .collect();
        if found.truncated {
            lines.push(format!(
                "... results truncated at {limit}; narrow the pattern or search a subdirectory"
            ));
        }
        Ok(ToolResult::ok(lines.join("\n")))
    }
}

struct Found {
    paths: Vec<(PathBuf, bool)>,
    truncated: bool,
}

fn walk(policy: &Arc<AccessPolicy>, root: &Path, matcher: Option<&glob::Pattern>, kind: EntryKind, limit: usize) -> Found {
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false);
    builder.follow_links(false);
    let filter_policy = Arc::clone(policy);
    builder.filter_entry(move |entry| filter_policy.blacklist_match(entry.path()).is_none());

    let mut found = Found {
        paths: Vec::new(),
        truncated: false,
    };
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        if !policy.contains(path) {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        if !kind.accepts(is_dir) {
            continue;
        }
        if let Some(pattern) = matcher {
            let matched = if pattern.as_str().contains('/') {
                path.strip_prefix(root)
                    .map(|rel| pattern.matches(&rel.to_string_lossy().replace('\\', "/")))
                    .unwrap_or(false)
            } else {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| pattern.matches(name))
            };
            if !matched {
                continue;
            }
        }
        if found.paths.len() >= limit {
            found.truncated = true;
            break;
        }
        found.paths.push((path.to_path_buf(), is_dir));
    }
    found.paths.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_access::tests::{sandbox, sandbox_with};

    fn populate(root: &Path) {
        std::fs::create_dir_all(root.join("src/nested")).unwrap();
        std::fs::create_dir_all(root.join(".hidden")).unwrap();
        std::fs::write(root.join("Cargo.toml"), "").unwrap();
        std::fs::write(root.join("src/lib.rs"), "").unwrap();
        std::fs::write(root.join("src/nested/deep.rs"), "").unwrap();
        std::fs::write(root.join(".hidden/inner.rs"), "").unwrap();
        std::fs::write(root.join(".env"), "SECRET=1").unwrap();
        std::fs::write(root.join(".gitignore"), "src/\n").unwrap();
    }

    #[test]
    fn entry_kind_parsing() {
        assert_eq!("file".parse::<EntryKind>(), Ok(EntryKind::File));
        assert_eq!("Directory".parse::<EntryKind>(), Ok(EntryKind::Dir));
        assert_eq!("both".parse::<EntryKind>(), Ok(EntryKind::Any));
        assert!("socket".parse::<EntryKind>().is_err());
    }

    #[tokio::test]
    async fn list_sorts_and_marks_directories() {
        let (dir, access) = sandbox_with(&["*.env"]);
        populate(dir.path());
        let result = access.list(".").await;
        assert_eq!(result.text, ".gitignore\n.hidden/\nCargo.toml\nsrc/");
    }

    #[tokio::test]
    async fn list_rejects_files_and_missing_dirs() {
        let (dir, access) = sandbox();
        populate(dir.path());
        assert!(access.list("Cargo.toml").await.error.unwrap().contains("not a directory"));
        assert!(access.list("nope").await.is_error());
    }

    #[tokio::test]
    async fn find_by_name_ignores_gitignore_and_hidden_filters() {
        let (dir, access) = sandbox();
        populate(dir.path());
        let result = access.find(".", Some("*.rs"), EntryKind::File).await.unwrap();
        assert_eq!(result.text, ".hidden/inner.rs\nsrc/lib.rs\nsrc/nested/deep.rs");
    }

    #[tokio::test]
    async fn find_directories_only() {
        let (dir, access) = sandbox();
        populate(dir.path());
        let result = access.find("src", None, EntryKind::Dir).await.unwrap();
        assert_eq!(result.text, "src/nested/");
    }

    #[tokio::test]
    async fn find_skips_blacklisted_subtrees() {
        let (dir, access) = sandbox_with(&[".hidden", "*.env"]);
        populate(dir.path());
        let result = access.find(".", None, EntryKind::Any).await.unwrap();
        assert!(!result.text.contains(".hidden"));
        assert!(!result.text.contains(".env"));
        assert!(result.text.contains("src/lib.rs"));
    }

    #[tokio::test]
    async fn find_output_is_capped() {
        let (dir, access) = sandbox();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "").unwrap();
        }
        let access = Arc::new(
            Arc::try_unwrap(access)
                .map(|a| a.with_find_limit(3))
                .unwrap_or_else(|_| unreachable!()),
        );
        let result = access.find(".", Some("*.txt"), EntryKind::File).await.unwrap();
        let lines: Vec<_> = result.text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[3].contains("truncated at 3"));
    }

    #[tokio::test]
    async fn find_with_path_pattern_and_bad_pattern() {
        let (dir, access) = sandbox();
        populate(dir.path());
        let result = access.find(".", Some("src/*/*.rs"), EntryKind::File).await.unwrap();
        assert_eq!(result.text, "src/nested/deep.rs");

        let result = access.find(".", Some("[bad"), EntryKind::Any).await.unwrap();
        assert!(result.error.unwrap().contains("Invalid pattern"));

        let result = access.find(".", Some("*.zig"), EntryKind::Any).await.unwrap();
        assert_eq!(result.text, "No matches under .");
    }

    #[tokio::test]
    async fn find_outside_sandbox_denied() {
        let (_dir, access) = sandbox();
        let result = access.find("/", None, EntryKind::Any).await.unwrap();
        assert!(result.is_error());
    }
}
