//! Sandboxed file access: the shared state and the tool surface.
//!
//! One [`FileAccess`] value backs five tools (`read_file`, `write_file`,
//! `edit_file`, `list_directory`, `find_files`). Every path goes through the
//! [`AccessPolicy`] first; every denial is returned to the model as a
//! [`ToolResult::error`] and recorded in the audit log.
//!
//! The operations themselves live in `file_read`, `file_write` and
//! `listing`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use convoke_core::context::CallContext;
use convoke_core::error::ToolError;
use convoke_core::registry::{Registry, ToolRegistry};
use convoke_core::tool::{ArgumentType, Tool, ToolArgument, ToolHandler, ToolResult};
use convoke_core::value::{ArgError, ToolArgs};
use convoke_security::{AccessPolicy, AuditEvent, AuditLogger, PathValidationError};
use tracing::{debug, warn};

use crate::listing::EntryKind;
use crate::read_registry::ReadRegistry;
use crate::validate::Validator;

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const EDIT_FILE: &str = "edit_file";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const FIND_FILES: &str = "find_files";

/// Default cap on `find_files` results.
pub const DEFAULT_FIND_LIMIT: usize = 200;

/// Sandboxed file operations sharing one read registry.
#[derive(Debug)]
pub struct FileAccess {
    pub(crate) policy: Arc<AccessPolicy>,
    pub(crate) reads: ReadRegistry,
    pub(crate) audit: Arc<AuditLogger>,
    pub(crate) validator: Option<Validator>,
    pub(crate) find_limit: usize,
}

impl FileAccess {
    /// File access under `policy`, auditing to `tracing`, no validation.
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            reads: ReadRegistry::new(),
            audit: Arc::new(AuditLogger::tracing()),
            validator: None,
            find_limit: DEFAULT_FIND_LIMIT,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    /// Run syntax checks after successful writes and edits.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_find_limit(mut self, limit: usize) -> Self {
        self.find_limit = limit.max(1);
        self
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn reads(&self) -> &ReadRegistry {
        &self.reads
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Resolve and check a path, auditing any denial.
    pub(crate) fn authorize(&self, tool: &str, raw: &str) -> Result<PathBuf, ToolResult> {
        self.policy.check(raw).map_err(|err| {
            let event = match &err {
                PathValidationError::Blacklisted { path, pattern } => AuditEvent::Blacklisted {
                    path: path.clone(),
                    pattern: pattern.clone(),
                },
                _ => AuditEvent::PathDenied { path: raw.to_string() },
            };
            self.audit.denied(event, tool, raw, err.to_string());
            ToolResult::error(err.to_string())
        })
    }

    /// Path as shown to the model: relative to the working directory when
    /// inside it.
    pub(crate) fn display(&self, path: &Path) -> String {
        match path.strip_prefix(self.policy.working_dir()) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".into(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().into_owned(),
        }
    }

    /// The five tools, all sharing this instance.
    pub fn tools(self: &Arc<Self>) -> Vec<Tool> {
        let handler = |op| -> Arc<dyn ToolHandler> {
            Arc::new(FileOpHandler {
                access: Arc::clone(self),
                op,
            })
        };

        vec![
            Tool::new(
                READ_FILE,
                "Read a text file. Returns numbered lines. Use offset and limit to page through long files. \
                 A file must be read before it can be overwritten or edited.",
                handler(FileOp::Read),
            )
            .with_argument(ToolArgument::required("path", ArgumentType::String, "File path, relative to the working directory"))
            .with_argument(ToolArgument::optional("offset", ArgumentType::Number, "First line to return (1-based)"))
            .with_argument(ToolArgument::optional("limit", ArgumentType::Number, "Maximum number of lines to return")),
            Tool::new(
                WRITE_FILE,
                "Write a file, replacing its contents. Creates missing parent directories. \
                 An existing file must have been read first and not changed since.",
                handler(FileOp::Write),
            )
            .with_argument(ToolArgument::required("path", ArgumentType::String, "File path, relative to the working directory"))
            .with_argument(ToolArgument::required("content", ArgumentType::String, "Full new file contents")),
            Tool::new(
                EDIT_FILE,
                "Replace an exact string in a file. old_string must be unique unless replace_all is set. \
                 The file must have been read first and not changed since.",
                handler(FileOp::Edit),
            )
            .with_argument(ToolArgument::required("path", ArgumentType::String, "File path, relative to the working directory"))
            .with_argument(ToolArgument::required("old_string", ArgumentType::String, "Exact text to replace"))
            .with_argument(ToolArgument::required("new_string", ArgumentType::String, "Replacement text"))
            .with_argument(ToolArgument::optional("replace_all", ArgumentType::Boolean, "Replace every occurrence")),
            Tool::new(
                LIST_DIRECTORY,
                "List the entries of a directory. Directories end with '/'.",
                handler(FileOp::List),
            )
            .with_argument(ToolArgument::optional("path", ArgumentType::String, "Directory path (default: working directory)")),
            Tool::new(
                FIND_FILES,
                "Recursively find files or directories by name pattern.",
                handler(FileOp::Find),
            )
            .with_argument(ToolArgument::optional("path", ArgumentType::String, "Directory to search (default: working directory)"))
            .with_argument(ToolArgument::optional("pattern", ArgumentType::String, "Glob on the entry name, e.g. '*.rs'"))
            .with_argument(ToolArgument::optional("kind", ArgumentType::String, "'file', 'dir' or 'any' (default)")),
        ]
    }

    /// A registry holding the five file tools.
    pub fn registry(self: &Arc<Self>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in self.tools() {
            if let Err(e) = registry.register(tool) {
                warn!(error = %e, "Skipping file tool");
            }
        }
        registry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileOp {
    Read,
    Write,
    Edit,
    List,
    Find,
}

impl FileOp {
    fn tool_name(&self) -> &'static str {
        match self {
            Self::Read => READ_FILE,
            Self::Write => WRITE_FILE,
            Self::Edit => EDIT_FILE,
            Self::List => LIST_DIRECTORY,
            Self::Find => FIND_FILES,
        }
    }
}

/// Typed arguments for one operation.
enum Request<'a> {
    Read {
        path: &'a str,
        offset: Option<u64>,
        limit: Option<u64>,
    },
    Write {
        path: &'a str,
        content: &'a str,
    },
    Edit {
        path: &'a str,
        old: &'a str,
        new: &'a str,
        replace_all: bool,
    },
    List {
        path: &'a str,
    },
    Find {
        path: &'a str,
        pattern: Option<&'a str>,
        kind: EntryKind,
    },
}

impl<'a> Request<'a> {
    fn parse(op: FileOp, args: &'a ToolArgs) -> Result<Self, ArgError> {
        Ok(match op {
            FileOp::Read => Self::Read {
                path: args.require_str("path")?,
                offset: args.optional_u64("offset")?,
                limit: args.optional_u64("limit")?,
            },
            FileOp::Write => Self::Write {
                path: args.require_str("path")?,
                content: args.require_str("content")?,
            },
            FileOp::Edit => Self::Edit {
                path: args.require_str("path")?,
                old: args.require_str("old_string")?,
                new: args.require_str("new_string")?,
                replace_all: args.optional_bool("replace_all")?.unwrap_or(false),
            },
            FileOp::List => Self::List {
                path: args.optional_str("path")?.unwrap_or("."),
            },
            FileOp::Find => Self::Find {
                path: args.optional_str("path")?.unwrap_or("."),
                pattern: args.optional_str("pattern")?,
                kind: match args.optional_str("kind")? {
                    None => EntryKind::Any,
                    Some(raw) => raw.parse().map_err(|reason| ArgError::Invalid {
                        name: "kind".into(),
                        reason,
                    })?,
                },
            },
        })
    }
}

struct FileOpHandler {
    access: Arc<FileAccess>,
    op: FileOp,
}

impl FileOpHandler {
    async fn run(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let request = match Request::parse(self.op, &args) {
            Ok(request) => request,
            Err(err) => return Ok(ToolResult::error(format!("{}: {err}", self.op.tool_name()))),
        };
        let access = &self.access;
        match request {
            Request::Read { path, offset, limit } => Ok(access.read(path, offset, limit).await),
            Request::Write { path, content } => Ok(access.write(path, content).await),
            Request::Edit {
                path,
                old,
                new,
                replace_all,
            } => Ok(access.edit(path, old, new, replace_all).await),
            Request::List { path } => Ok(access.list(path).await),
            Request::Find { path, pattern, kind } => access.find(path, pattern, kind).await,
        }
    }
}

#[async_trait]
impl ToolHandler for FileOpHandler {
    async fn call(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let tool = self.op.tool_name();
        debug!(tool, call_id = ?ctx.call_id(), "File tool call");
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ToolError::Cancelled(tool.to_string())),
            out = self.run(args) => out,
        }
    }
}
