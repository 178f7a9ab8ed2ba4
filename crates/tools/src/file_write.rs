//! `write_file` and `edit_file`: writes guarded by the read registry.

use std::io::ErrorKind;
use std::path::Path;

use convoke_core::tool::ToolResult;
use convoke_security::{AuditEvent, AuditOutcome};
use tracing::debug;

use crate::file_access::{EDIT_FILE, FileAccess, WRITE_FILE};
use crate::read_registry::StaleWrite;

impl FileAccess {
    /// Replace the contents of `raw`, creating it (and its parents) if needed.
    pub async fn write(&self, raw: &str, content: &str) -> ToolResult {
        let path = match self.authorize(WRITE_FILE, raw) {
            Ok(path) => path,
            Err(denied) => return denied,
        };
        if let Err(refused) = self.guard_write(WRITE_FILE, raw, &path).await {
            return refused;
        }

        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::error(format!("Failed to create parent directories for {raw}: {e}"));
        }
        if let Err(e) = tokio::fs::write(&path, content).await {
            return ToolResult::error(format!("Failed to write {raw}: {e}"));
        }

        self.reads.record(&path).await;
        debug!(path = %path.display(), bytes = content.len(), "Wrote file");
        self.audit.log(
            AuditEvent::ToolExecution {
                tool_name: WRITE_FILE.into(),
            },
            WRITE_FILE,
            raw,
            AuditOutcome::Success,
            Some(format!("{} bytes", content.len())),
        );

        let mut text = format!("Wrote {} bytes to {raw}", content.len());
        self.append_validation(WRITE_FILE, raw, &path, &mut text).await;
        ToolResult::ok(text)
    }

    /// Replace `old` with `new` in an existing file.
    ///
    /// `old` must occur exactly once unless `replace_all` is set.
    pub async fn edit(&self, raw: &str, old: &str, new: &str, replace_all: bool) -> ToolResult {
        if old == new {
            return ToolResult::error("old_string and new_string are identical; nothing to change");
        }
        if old.is_empty() {
            return ToolResult::error("old_string must not be empty; use write_file to create content");
        }

        let path = match self.authorize(EDIT_FILE, raw) {
            Ok(path) => path,
            Err(denied) => return denied,
        };
        if let Err(refused) = self.guard_write(EDIT_FILE, raw, &path).await {
            return refused;
        }

        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return ToolResult::error(format!("{raw} is a binary file and cannot be edited")),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return ToolResult::error(format!("File not found: {raw}. Use write_file to create it"));
            }
            Err(e) => return ToolResult::error(format!("Failed to read {raw}: {e}")),
        };

        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return ToolResult::error(format!(
                "old_string was not found in {raw}; read the file again to get the exact text"
            ));
        }
        if occurrences > 1 && !replace_all {
            return ToolResult::error(format!(
                "old_string occurs {occurrences} times in {raw}; include more surrounding context \
                 to make it unique, or set replace_all"
            ));
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        if updated == content {
            return ToolResult::error(format!("Edit left {raw} unchanged"));
        }

        if let Err(e) = tokio::fs::write(&path, &updated).await {
            return ToolResult::error(format!("Failed to write {raw}: {e}"));
        }

        let replaced = if replace_all { occurrences } else { 1 };
        self.reads.record(&path).await;
        debug!(path = %path.display(), replaced, "Edited file");
        self.audit.log(
            AuditEvent::ToolExecution {
                tool_name: EDIT_FILE.into(),
            },
            EDIT_FILE,
            raw,
            AuditOutcome::Success,
            Some(format!("{replaced} replacement(s)")),
        );

        let noun = if replaced == 1 { "occurrence" } else { "occurrences" };
        let mut text = format!("Replaced {replaced} {noun} in {raw}");
        self.append_validation(EDIT_FILE, raw, &path, &mut text).await;
        ToolResult::ok(text)
    }

    /// Refuse writes to existing files that are unread or stale.
    async fn guard_write(&self, tool: &str, raw: &str, path: &Path) -> Result<(), ToolResult> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ToolResult::error(format!("Cannot inspect {raw}: {e}"))),
        };
        if meta.is_dir() {
            return Err(ToolResult::error(format!("{raw} is a directory")));
        }

        self.reads
            .check_write(path, meta.modified().ok())
            .await
            .map_err(|stale| {
                let event = match stale {
                    StaleWrite::NotRead => AuditEvent::UnreadWrite { path: raw.into() },
                    StaleWrite::ModifiedAfterRead => AuditEvent::StaleWrite { path: raw.into() },
                };
                self.audit.denied(event, tool, raw, stale.to_string());
                ToolResult::error(format!(
                    "{raw}: {stale}; read it with read_file and try again"
                ))
            })
    }

    async fn append_validation(&self, tool: &str, raw: &str, path: &Path, text: &mut String) {
        let Some(validator) = &self.validator else {
            return;
        };
        let Some(report) = validator.validate(path).await else {
            return;
        };
        if !report.passed() {
            self.audit.log(
                AuditEvent::ValidationFailed {
                    path: raw.into(),
                    validator: report.failures(),
                },
                tool,
                raw,
                AuditOutcome::Failure,
                None,
            );
        }
        text.push_str("\n\n");
        text.push_str(&report.render());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use crate::file_access::tests::sandbox;
    use crate::validate::tests::FakeRunner;
    use crate::validate::{CommandOutcome, Validator};

    fn touch_future(path: &std::path::Path) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
    }

    #[tokio::test]
    async fn unread_existing_file_cannot_be_written() {
        let (dir, access) = sandbox();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();

        let result = access.write("a.txt", "new").await;
        assert!(result.error.unwrap().contains("not read before write"));

        assert!(!access.read("a.txt", None, None).await.is_error());
        let result = access.write("a.txt", "new").await;
        assert!(!result.is_error(), "{result:?}");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn new_file_bypasses_guard_and_creates_parents() {
        let (dir, access) = sandbox();
        let result = access.write("deep/nested/file.txt", "hello").await;
        assert_eq!(result.text, "Wrote 5 bytes to deep/nested/file.txt");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("deep/nested/file.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn chained_writes_need_no_reread() {
        let (_dir, access) = sandbox();
        assert!(!access.write("a.txt", "1").await.is_error());
        assert!(!access.write("a.txt", "2").await.is_error());
        assert!(!access.edit("a.txt", "2", "3", false).await.is_error());
        assert!(!access.edit("a.txt", "3", "4", false).await.is_error());
    }

    #[tokio::test]
    async fn external_modification_is_detected() {
        let (dir, access) = sandbox();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "v1").unwrap();
        access.read("a.txt", None, None).await;

        touch_future(&file);
        let result = access.write("a.txt", "v2").await;
        assert!(result.error.unwrap().contains("modified after last read"));
        let result = access.edit("a.txt", "v1", "v2", false).await;
        assert!(result.error.unwrap().contains("modified after last read"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "v1");
    }

    #[tokio::test]
    async fn read_of_missing_file_then_create() {
        let (dir, access) = sandbox();
        assert!(access.read("fresh.txt", None, None).await.is_error());
        assert!(!access.write("fresh.txt", "x").await.is_error());
        assert!(dir.path().join("fresh.txt").exists());
    }

    #[tokio::test]
    async fn edit_single_occurrence() {
        let (dir, access) = sandbox();
        std::fs::write(dir.path().join("a.txt"), "let foo = 1;").unwrap();
        access.read("a.txt", None, None).await;

        let result = access.edit("a.txt", "foo", "bar", false).await;
        assert_eq!(result.text, "Replaced 1 occurrence in a.txt");
        let content = std::fs::read_to_string(dir.path().join("a.txt")).unwrap();
        assert!(!content.contains("foo"));
        assert_eq!(content, "let bar = 1;");
    }

    #[tokio::test]
    async fn ambiguous_edit_reports_count() {
        let (dir, access) = sandbox();
        std::fs::write(dir.path().join("a.txt"), "foo foo").unwrap();
        access.read("a.txt", None, None).await;

        let result = access.edit("a.txt", "foo", "bar", false).await;
        assert!(result.error.unwrap().contains("occurs 2 times"));

        let result = access.edit("a.txt", "foo", "bar", true).await;
        assert_eq!(result.text, "Replaced 2 occurrences in a.txt");
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "bar bar");
    }

    #[tokio::test]
    async fn identical_strings_fail_before_touching_file() {
        let (dir, access) = sandbox();
        // Never read, so any file access would hit the guard instead.
        std::fs::write(dir.path().join("a.txt"), "foo").unwrap();
        let result = access.edit("a.txt", "foo", "foo", false).await;
        assert!(result.error.unwrap().contains("identical"));
        assert!(access.audit().entries().is_empty());
    }

    #[tokio::test]
    async fn edit_missing_text_or_file() {
        let (dir, access) = sandbox();
        std::fs::write(dir.path().join("a.txt"), "abc").unwrap();
        access.read("a.txt", None, None).await;
        let result = access.edit("a.txt", "xyz", "q", false).await;
        assert!(result.error.unwrap().contains("not found"));

        let result = access.edit("ghost.txt", "a", "b", false).await;
        assert!(result.error.unwrap().contains("File not found"));
    }

    #[tokio::test]
    async fn blacklisted_write_names_pattern() {
        let (_dir, access) = crate::file_access::tests::sandbox_with(&["*secret*"]);
        let result = access.write("config/secret.env", "x").await;
        assert!(result.error.unwrap().contains("*secret*"));
    }

    #[tokio::test]
    async fn validation_summary_is_appended_without_rollback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("util.go"), "package main\n").unwrap();
        let runner = Arc::new(FakeRunner {
            answers: vec![(
                "go",
                CommandOutcome::Completed {
                    success: false,
                    output: "main.go:3: undefined: x".into(),
                },
            )],
            ..Default::default()
        });
        let policy = convoke_security::AccessPolicy::new(dir.path(), Vec::new(), Vec::new()).unwrap();
        let access = crate::FileAccess::new(policy)
            .with_audit(Arc::new(convoke_security::AuditLogger::new()))
            .with_validator(Validator::new(runner, Duration::from_secs(5)));

        let result = access.write("main.go", "package main\n\nvar y = x\n").await;
        assert!(!result.is_error());
        assert!(result.text.contains("Go validation FAILED"));
        assert!(result.text.contains("undefined: x"));
        assert!(dir.path().join("main.go").exists());
    }
}
