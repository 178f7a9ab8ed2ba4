//! Path validation: filesystem sandboxing for the file-access tool.
//!
//! An [`AccessPolicy`] is built once from configuration and never changes.
//! It answers three questions, in order:
//! 1. Where does this path point? Relative paths resolve against the
//!    configured working directory, never the process's own cwd.
//! 2. Is it inside an allowed root?
//! 3. Does it hit the blacklist?

use std::path::{Component, Path, PathBuf};

use tracing::warn;

/// Error returned when path validation fails.
///
/// The messages are shown to the model, so they say what was denied and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is empty or contains invalid characters")]
    InvalidPath { path: String },

    #[error(
        "Absolute path '{path}' is outside the working directory '{working_dir}'; \
         use a path inside it or a relative path"
    )]
    OutsideWorkingDirectory { path: String, working_dir: String },

    #[error("Path '{path}' is outside the allowed roots: {roots}")]
    OutsideAllowedRoots { path: String, roots: String },

    #[error("Access to '{path}' is denied: it matches blacklist pattern '{pattern}'")]
    Blacklisted { path: String, pattern: String },

    #[error("Path '{path}' resolves through a symlink to '{target}', which is outside the allowed roots")]
    SymlinkEscape { path: String, target: String },

    #[error("Working directory '{path}' must be an absolute path")]
    RelativeWorkingDirectory { path: String },
}

#[derive(Debug, Clone)]
struct BlacklistPattern {
    raw: String,
    glob: Option<glob::Pattern>,
}

impl BlacklistPattern {
    fn new(raw: String) -> Self {
        let glob = match glob::Pattern::new(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(pattern = %raw, error = %e, "Blacklist entry is not a valid glob; matching it literally");
                None
            }
        };
        Self { raw, glob }
    }

    fn matches(&self, candidate: &str) -> bool {
        candidate == self.raw || self.glob.as_ref().is_some_and(|g| g.matches(candidate))
    }
}

/// Immutable sandbox rules for one file-access tool instance.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    working_dir: PathBuf,
    allowed_roots: Vec<PathBuf>,
    /// Allowed roots with symlinks resolved, for escape detection.
    canonical_roots: Vec<PathBuf>,
    blacklist: Vec<BlacklistPattern>,
}

impl AccessPolicy {
    /// Build a policy. The working directory is always an allowed root.
    ///
    /// Relative entries in `allowed_roots` are taken relative to the
    /// working directory.
    pub fn new(
        working_dir: impl AsRef<Path>,
        allowed_roots: impl IntoIterator<Item = PathBuf>,
        blacklist: impl IntoIterator<Item = String>,
    ) -> Result<Self, PathValidationError> {
        let working_dir = working_dir.as_ref();
        if !working_dir.is_absolute() {
            return Err(PathValidationError::RelativeWorkingDirectory {
                path: working_dir.display().to_string(),
            });
        }
        let working_dir = normalize(working_dir);

        let mut roots = vec![working_dir.clone()];
        for root in allowed_roots {
            let root = if root.is_absolute() {
                normalize(&root)
            } else {
                normalize(&working_dir.join(root))
            };
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        let canonical_roots = roots
            .iter()
            .map(|r| r.canonicalize().unwrap_or_else(|_| r.clone()))
            .collect();

        Ok(Self {
            working_dir,
            allowed_roots: roots,
            canonical_roots,
            blacklist: blacklist.into_iter().map(BlacklistPattern::new).collect(),
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    pub fn blacklist(&self) -> impl Iterator<Item = &str> {
        self.blacklist.iter().map(|p| p.raw.as_str())
    }

    /// Turn a caller-supplied path into an absolute, normalized one.
    ///
    /// No security checks run here; an absolute path outside the working
    /// directory is rejected before they would.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, PathValidationError> {
        if raw.trim().is_empty() || raw.contains('\0') {
            return Err(PathValidationError::InvalidPath { path: raw.into() });
        }

        let expanded = expand_tilde(raw);
        let candidate = Path::new(&expanded);

        if candidate.is_absolute() {
            let normalized = normalize(candidate);
            if !is_contained(&normalized, std::slice::from_ref(&self.working_dir)) {
                return Err(PathValidationError::OutsideWorkingDirectory {
                    path: raw.into(),
                    working_dir: self.working_dir.display().to_string(),
                });
            }
            Ok(normalized)
        } else {
            Ok(normalize(&self.working_dir.join(candidate)))
        }
    }

    /// Resolve and fully validate a caller-supplied path.
    pub fn check(&self, raw: &str) -> Result<PathBuf, PathValidationError> {
        let resolved = self.resolve(raw)?;
        self.check_resolved(&resolved)?;
        Ok(resolved)
    }

    /// Containment, blacklist and symlink checks on an already-resolved path.
    pub fn check_resolved(&self, path: &Path) -> Result<(), PathValidationError> {
        if !is_contained(path, &self.allowed_roots) {
            return Err(PathValidationError::OutsideAllowedRoots {
                path: path.display().to_string(),
                roots: self
                    .allowed_roots
                    .iter()
                    .map(|r| r.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        if let Some(pattern) = self.blacklist_match(path) {
            return Err(PathValidationError::Blacklisted {
                path: path.display().to_string(),
                pattern: pattern.to_string(),
            });
        }

        if let Some(real) = canonicalize_existing(path)
            && real != path
        {
            if !is_contained(&real, &self.canonical_roots) {
                return Err(PathValidationError::SymlinkEscape {
                    path: path.display().to_string(),
                    target: real.display().to_string(),
                });
            }
            if let Some(pattern) = self.blacklist_match(&real) {
                return Err(PathValidationError::Blacklisted {
                    path: path.display().to_string(),
                    pattern: pattern.to_string(),
                });
            }
        }

        Ok(())
    }

    /// The first blacklist pattern matching the path's basename or full path.
    pub fn blacklist_match(&self, path: &Path) -> Option<&str> {
        let full = path.to_string_lossy();
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.blacklist
            .iter()
            .find(|p| (!base.is_empty() && p.matches(&base)) || p.matches(&full))
            .map(|p| p.raw.as_str())
    }

    /// Whether the path lies inside an allowed root (no blacklist check).
    pub fn contains(&self, path: &Path) -> bool {
        is_contained(path, &self.allowed_roots)
    }
}

/// `path` equals one of `roots` or is a strict descendant of one.
///
/// Comparison is per component, so `/foo/barbaz` is not inside `/foo/bar`.
pub fn is_contained(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| path == root || path.starts_with(root))
}

/// Lexically normalize a path: drop `.`, fold `..`, never climb above the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor and re-attach the rest.
fn canonicalize_existing(path: &Path) -> Option<PathBuf> {
    let mut existing = path;
    let mut tail = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            let mut out = real;
            for part in tail.iter().rev() {
                out.push(part);
            }
            return Some(out);
        }
        tail.push(existing.file_name()?.to_os_string());
        existing = existing.parent()?;
    }
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Ok(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Result<String, std::env::VarError> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn policy(roots: &[&str], blacklist: &[&str]) -> AccessPolicy {
        AccessPolicy::new(
            "/work/project",
            roots.iter().map(PathBuf::from),
            blacklist.iter().map(|s| s.to_string()),
        )
        .unwrap()
    }

    #[test]
    fn containment_is_component_wise() {
        let roots = vec![PathBuf::from("/foo/bar")];
        assert!(is_contained(Path::new("/foo/bar"), &roots));
        assert!(is_contained(Path::new("/foo/bar/baz.txt"), &roots));
        assert!(!is_contained(Path::new("/foo/barbaz"), &roots));
        assert!(!is_contained(Path::new("/foo"), &roots));
    }

    #[test]
    fn relative_paths_resolve_against_working_dir() {
        let p = policy(&[], &[]);
        assert_eq!(p.resolve("src/main.rs").unwrap(), PathBuf::from("/work/project/src/main.rs"));
        assert_eq!(p.resolve("./a/../b").unwrap(), PathBuf::from("/work/project/b"));
    }

    #[test]
    fn absolute_outside_working_dir_fails_resolution() {
        let p = policy(&["/data"], &[]);
        let err = p.resolve("/etc/passwd").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideWorkingDirectory { .. }));

        // Traversal is folded before the check.
        let err = p.resolve("/work/project/../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideWorkingDirectory { .. }));

        assert!(p.resolve("/work/project/notes.md").is_ok());
        assert!(p.resolve("/work/project").is_ok());
    }

    #[test]
    fn relative_escape_is_caught_by_containment() {
        let p = policy(&[], &[]);
        let err = p.check("../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathValidationError::OutsideAllowedRoots { .. }));
    }

    #[test]
    fn extra_roots_reachable_relatively() {
        let p = policy(&["/work/shared"], &[]);
        assert_eq!(p.allowed_roots().len(), 2);
        assert!(p.check("../shared/readme.md").is_ok());
        assert!(p.check("../sharedx/readme.md").is_err());
    }

    #[test]
    fn working_dir_is_always_allowed() {
        let p = policy(&["/elsewhere"], &[]);
        assert_eq!(p.allowed_roots()[0], PathBuf::from("/work/project"));
        assert!(p.contains(Path::new("/work/project/x")));
    }

    #[test]
    fn blacklist_matches_basename_and_full_path() {
        let p = policy(&[], &["*secret*", "*.env", "/work/project/private/keys.txt", "id_rsa"]);
        assert_eq!(p.blacklist_match(Path::new("secret.env")), Some("*secret*"));
        assert_eq!(p.blacklist_match(Path::new("/any/path/secret.env")), Some("*secret*"));
        assert_eq!(p.blacklist_match(Path::new("/work/project/config.env")), Some("*.env"));
        assert_eq!(p.blacklist_match(Path::new("/work/project/config.envx")), None);
        assert_eq!(
            p.blacklist_match(Path::new("/work/project/private/keys.txt")),
            Some("/work/project/private/keys.txt")
        );
        assert_eq!(p.blacklist_match(Path::new("/work/project/.ssh/id_rsa")), Some("id_rsa"));
    }

    #[test]
    fn invalid_glob_still_matches_literally() {
        let p = policy(&[], &["[oops"]);
        assert_eq!(p.blacklist_match(Path::new("/work/project/[oops")), Some("[oops"));
        assert_eq!(p.blacklist_match(Path::new("/work/project/oops")), None);
    }

    #[test]
    fn blacklist_error_names_pattern() {
        let p = policy(&[], &["*.pem"]);
        let err = p.check("certs/server.pem").unwrap_err();
        assert!(err.to_string().contains("'*.pem'"));
    }

    #[test]
    fn relative_working_dir_rejected() {
        let err = AccessPolicy::new("relative/dir", Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, PathValidationError::RelativeWorkingDirectory { .. }));
    }

    #[test]
    fn empty_path_rejected() {
        let p = policy(&[], &[]);
        assert!(matches!(p.resolve("  "), Err(PathValidationError::InvalidPath { .. })));
    }

    #[test]
    fn normalize_never_climbs_above_root() {
        assert_eq!(normalize(Path::new("/../../a")), PathBuf::from("/a"));
        assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
    }

    #[test]
    fn symlink_escape_is_denied() {
        let sandbox = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("target.txt"), "x").unwrap();
        std::os::unix::fs::symlink(outside.path(), sandbox.path().join("link")).unwrap();

        let p = AccessPolicy::new(sandbox.path(), Vec::new(), Vec::new()).unwrap();
        let err = p.check("link/target.txt").unwrap_err();
        assert!(matches!(err, PathValidationError::SymlinkEscape { .. }), "{err}");

        std::fs::write(sandbox.path().join("plain.txt"), "y").unwrap();
        assert!(p.check("plain.txt").is_ok());
        assert!(p.check("not/yet/created.txt").is_ok());
    }
}
