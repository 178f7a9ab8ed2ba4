//! `read_file`: numbered, windowed reads that arm the write guard.

use std::io::ErrorKind;

use convoke_core::tool::ToolResult;
use convoke_security::{AuditEvent, AuditOutcome};
use tracing::debug;

use crate::file_access::{FileAccess, READ_FILE};

/// Lines returned when the caller gives no limit.
pub const DEFAULT_READ_LIMIT: u64 = 2000;

impl FileAccess {
    /// Read up to `limit` lines starting at 1-based line `offset`.
    ///
    /// A missing file is an error, but the attempt is still recorded so the
    /// model can go on to create the file.
    pub async fn read(&self, raw: &str, offset: Option<u64>, limit: Option<u64>) -> ToolResult {
        let path = match self.authorize(READ_FILE, raw) {
            Ok(path) => path,
            Err(denied) => return denied,
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return ToolResult::error(format!(
                    "{raw} is a directory; use list_directory to see its entries"
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.reads.record(&path).await;
                return ToolResult::error(format!(
                    "File not found: {raw}. It does not exist yet; write_file can create it"
                ));
            }
            Err(e) => return ToolResult::error(format!("Failed to read {raw}: {e}")),
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolResult::error(format!("Failed to read {raw}: {e}")),
        };
        let Ok(content) = String::from_utf8(bytes) else {
            return ToolResult::error(format!("{raw} is a binary file and cannot be shown as text"));
        };

        self.reads.record(&path).await;
        debug!(path = %path.display(), bytes = content.len(), "Read file");
        self.audit.log(
            AuditEvent::ToolExecution {
                tool_name: READ_FILE.into(),
            },
            READ_FILE,
            raw,
            AuditOutcome::Success,
            None,
        );

        match render_window(&content, offset, limit) {
            Ok(text) => ToolResult::ok(text),
            Err(message) => ToolResult::error(format!("{raw}: {message}")),
        }
    }
}

/// Number the requested window of lines.
fn render_window(content: &str, offset: Option<u64>, limit: Option<u64>) -> Result<String, String> {
    if content.is_empty() {
        return Ok("(empty file)".into());
    }

    let total = content.lines().count() as u64;
    let start = offset.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_READ_LIMIT).max(1);
    if start > total {
        return Err(format!("offset {start} is past the end of the file ({total} lines)"));
    }

    let mut out = String::new();
    let mut last = start - 1;
    for (number, line) in content
        .lines()
        .enumerate()
        .map(|(i, l)| (i as u64 + 1, l))
        .skip((start - 1) as usize)
        .take(limit as usize)
    {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("{number:>6}\t{line}"));
        last = number;
    }

    if last < total {
        out.push_str(&format!(
            "\n... {} more lines; continue with offset={}",
            total - last,
            last + 1
        ));
    }
    Ok(out)
}
