//! Adapter contract: the abstraction over LLM backends.
//!
//! Every backend (OpenAI-compatible, Anthropic, Ollama) implements
//! [`ChatAdapter`]. The agent loop calls `chat()` or
//! `chat_with_tool_choice()` with its history and gets back exactly one
//! message: an assistant answer or a single tool call.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::choice::ToolChoice;
use crate::context::CallContext;
use crate::error::ProviderError;
use crate::message::Message;
use crate::registry::Registry;
use crate::tool::Tool;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Build the JSON-schema parameter object from a tool's declared arguments.
    pub fn from_tool(tool: &Tool) -> Self {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for arg in &tool.arguments {
            properties.insert(
                arg.name.clone(),
                serde_json::json!({
                    "type": arg.kind.as_str(),
                    "description": arg.description,
                }),
            );
            if arg.required {
                required.push(serde_json::Value::String(arg.name.clone()));
            }
        }
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Settings shared by every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterOptions {
    /// Model identifier as the backend knows it.
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Consume the response incrementally.
    #[serde(default)]
    pub stream: bool,

    /// Token budget for reasoning when thinking is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

impl AdapterOptions {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            temperature: None,
            stream: false,
            thinking_budget: None,
        }
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// The common chat / tool-choice contract.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// A human-readable backend name (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Attach the registry whose tools are offered to the model.
    fn set_registry(&mut self, registry: Arc<dyn Registry>);

    /// One turn with automatic tool choice.
    async fn chat(
        &self,
        ctx: &CallContext,
        history: &[Message],
        enable_thinking: bool,
    ) -> Result<Message, ProviderError>;

    /// One turn with an explicit tool choice.
    async fn chat_with_tool_choice(
        &self,
        ctx: &CallContext,
        history: &[Message],
        choice: &ToolChoice,
    ) -> Result<Message, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ArgumentType, ToolArgument, ToolResult, handler_fn};

    #[test]
    fn tool_definition_schema() {
        let tool = Tool::new(
            "read_file",
            "Read a file",
            handler_fn(|_ctx, _args| async { Ok(ToolResult::ok("")) }),
        )
        .with_argument(ToolArgument::required("path", ArgumentType::String, "File path"))
        .with_argument(ToolArgument::optional("limit", ArgumentType::Number, "Max lines"));

        let def = ToolDefinition::from_tool(&tool);
        assert_eq!(def.name, "read_file");
        assert_eq!(def.parameters["type"], "object");
        assert_eq!(def.parameters["properties"]["path"]["type"], "string");
        assert_eq!(def.parameters["properties"]["limit"]["description"], "Max lines");
        assert_eq!(def.parameters["required"], serde_json::json!(["path"]));
    }

    #[test]
    fn tool_definition_serialization() {
        let def = ToolDefinition {
            name: "find_files".into(),
            description: "Find files".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}, "required": []}),
        };
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("find_files"));
    }

    #[test]
    fn adapter_options_defaults() {
        let opts = AdapterOptions::new("gpt-4o", 4096).streaming(true);
        assert!(opts.stream);
        assert!(opts.temperature.is_none());
        assert_eq!(opts.max_tokens, 4096);
    }
}
