//! Tool model: the abstraction over agent capabilities.
//!
//! A [`Tool`] is a name, a description, a typed argument list and a handler.
//! Handlers report user-facing problems through [`ToolResult::error`] so the
//! model can read the failure and retry; only genuinely broken situations
//! become a [`ToolError`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::ToolError;
use crate::value::{ArgError, ToolArgs};

/// The kind of value an argument accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ArgumentType {
    /// The JSON-schema `type` keyword for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared argument of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolArgument {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ArgumentType,
    pub required: bool,
}

impl ToolArgument {
    pub fn required(name: impl Into<String>, kind: ArgumentType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ArgumentType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            required: false,
        }
    }
}

/// The outcome of a tool call: either text for the model, or an error the
/// model should read and act on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

impl From<ArgError> for ToolResult {
    fn from(err: ArgError) -> Self {
        Self::error(err.to_string())
    }
}

/// Executes one tool call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolResult, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(CallContext, ToolArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolResult, ToolError>> + Send,
{
    async fn call(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolResult, ToolError> {
        (self.0)(ctx.clone(), args).await
    }
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(CallContext, ToolArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A registered capability.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ToolArgument>,
    handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            arguments: Vec::new(),
            handler,
        }
    }

    pub fn with_argument(mut self, argument: ToolArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    /// Check supplied arguments against the declared ones.
    ///
    /// Unknown extra arguments are tolerated; handlers ignore what they
    /// don't read.
    pub fn check_arguments(&self, args: &ToolArgs) -> Result<(), ArgError> {
        for decl in &self.arguments {
            match args.get(&decl.name) {
                None if decl.required => {
                    return Err(ArgError::Missing {
                        name: decl.name.clone(),
                    });
                }
                None => {}
                Some(value) if value.kind() != decl.kind => {
                    return Err(ArgError::WrongType {
                        name: decl.name.clone(),
                        expected: decl.kind,
                        found: value.kind(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Run the handler with already-converted arguments.
    pub async fn invoke(&self, ctx: &CallContext, args: ToolArgs) -> Result<ToolResult, ToolError> {
        if let Err(err) = self.check_arguments(&args) {
            return Ok(ToolResult::error(format!("{}: {err}", self.name)));
        }
        self.handler.call(ctx, args).await
    }
}
