//! Capability registries and dispatch.
//!
//! The agent loop uses a registry to:
//! 1. Hand tool declarations to the adapter
//! 2. Look up and execute the tool a model asked for
//!
//! [`ToolRegistry`] owns tools directly. [`CompositeRegistry`] flattens
//! several registries into one namespace without taking ownership of
//! their tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::tool::{Tool, ToolResult};
use crate::value::ToolArgs;

/// Raw arguments as a backend proposed them.
pub type RawArguments = serde_json::Map<String, serde_json::Value>;

/// Name → tool lookup plus dispatch.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Register a tool. Replaces any existing tool with the same name.
    fn register(&mut self, tool: Tool) -> Result<(), ToolError>;

    /// Get a tool by name.
    fn get(&self, name: &str) -> Option<&Tool>;

    /// All tools, ordered by name.
    fn list(&self) -> &BTreeMap<String, Tool>;

    fn is_empty(&self) -> bool {
        self.list().is_empty()
    }

    /// Get all tool definitions (for sending to the LLM).
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.list().values().map(ToolDefinition::from_tool).collect()
    }

    /// Execute a named tool.
    ///
    /// An unknown name or unusable arguments come back as a
    /// [`ToolResult::error`] so the model can correct itself; only handler
    /// hard failures surface as `Err`.
    async fn dispatch(
        &self,
        ctx: &CallContext,
        name: &str,
        args: &RawArguments,
    ) -> Result<ToolResult, ToolError> {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Dispatch to unknown tool");
            let known: Vec<&str> = self.list().keys().map(String::as_str).collect();
            return Ok(ToolResult::error(format!(
                "tool '{name}' not found; available tools: {}",
                if known.is_empty() { "(none)".to_string() } else { known.join(", ") }
            )));
        };

        let args = match ToolArgs::from_json_map(args) {
            Ok(args) => args,
            Err(e) => return Ok(ToolResult::error(format!("{name}: {e}"))),
        };

        if ctx.is_cancelled() {
            return Err(ToolError::Cancelled(name.to_string()));
        }

        debug!(tool = %name, call_id = ?ctx.call_id(), "Dispatching tool call");
        tool.invoke(ctx, args).await
    }
}

/// A registry that owns its tools.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration for bootstrap code.
    pub fn with_tool(mut self, tool: Tool) -> Result<Self, ToolError> {
        self.register(tool)?;
        Ok(self)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

impl Registry for ToolRegistry {
    fn register(&mut self, tool: Tool) -> Result<(), ToolError> {
        if tool.name.trim().is_empty() {
            return Err(ToolError::InvalidName(tool.name.clone()));
        }
        if self.tools.contains_key(&tool.name) {
            debug!(tool = %tool.name, "Replacing previously registered tool");
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    fn list(&self) -> &BTreeMap<String, Tool> {
        &self.tools
    }
}

/// One namespace over several source registries.
///
/// Built once: sources are visited in order and each tool is inserted into a
/// single map, so a later source overwrites an earlier one on a name clash.
pub struct CompositeRegistry {
    sources: Vec<Arc<dyn Registry>>,
    tools: BTreeMap<String, Tool>,
}

impl CompositeRegistry {
    pub fn new(sources: Vec<Arc<dyn Registry>>) -> Self {
        let mut tools = BTreeMap::new();
        for (index, source) in sources.iter().enumerate() {
            for (name, tool) in source.list() {
                if tools.insert(name.clone(), tool.clone()).is_some() {
                    warn!(tool = %name, source = index, "Tool name shadowed by a later source");
                }
            }
        }
        Self { sources, tools }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

impl std::fmt::Debug for CompositeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeRegistry")
            .field("sources", &self.sources.len())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry for CompositeRegistry {
    fn register(&mut self, tool: Tool) -> Result<(), ToolError> {
        warn!(tool = %tool.name, "Refusing registration on a composite registry");
        Err(ToolError::RegistrationUnsupported {
            registry: "composite registry".into(),
        })
    }

    fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    fn list(&self) -> &BTreeMap<String, Tool> {
        &self.tools
    }
}
