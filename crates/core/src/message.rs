//! Message domain types.
//!
//! These are the value objects the external agent loop keeps as history:
//! an adapter produces `Assistant` / `ToolCall` messages, the dispatcher's
//! outcome becomes a `ToolResult` message, and the loop appends them in order.
//! Messages are never mutated after construction.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolResult;

/// Token usage reported by a backend for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }

    /// Fill in fields that a later report knows and an earlier one didn't.
    pub fn merge(self, later: Usage) -> Usage {
        let input = if later.input_tokens > 0 { later.input_tokens } else { self.input_tokens };
        let output = if later.output_tokens > 0 { later.output_tokens } else { self.output_tokens };
        let mut merged = Usage::new(input, output);
        if later.total_tokens > merged.total_tokens {
            merged.total_tokens = later.total_tokens;
        }
        merged
    }
}

/// An opaque encoded image attached to a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    /// e.g. `image/png`
    pub media_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,
    /// Reasoning text surfaced separately from the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub tool_name: String,
    /// Arguments exactly as the backend proposed them. Conversion into
    /// [`ToolArgs`](crate::value::ToolArgs) happens at dispatch.
    pub arguments: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResultMessage {
    /// The text a backend should show the model for this result.
    pub fn rendered(&self) -> String {
        match &self.error {
            Some(err) if self.content.is_empty() => format!("Error: {err}"),
            Some(err) => format!("{}\nError: {err}", self.content),
            None => self.content.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    ToolCall(ToolCallMessage),
    ToolResult(ToolResultMessage),
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(UserMessage {
            content: content.into(),
            images: Vec::new(),
        })
    }

    pub fn user_with_images(content: impl Into<String>, images: Vec<ImageData>) -> Self {
        Self::User(UserMessage {
            content: content.into(),
            images,
        })
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(AssistantMessage {
            content: content.into(),
            thinking: None,
            usage: None,
        })
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(SystemMessage {
            content: content.into(),
        })
    }

    pub fn tool_call(
        call_id: Option<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::ToolCall(ToolCallMessage {
            call_id,
            tool_name: tool_name.into(),
            arguments,
            timestamp: Utc::now(),
            usage: None,
        })
    }

    /// Create a tool result message from a dispatcher outcome.
    pub fn tool_result(call_id: Option<String>, result: ToolResult) -> Self {
        Self::ToolResult(ToolResultMessage {
            call_id,
            content: result.text,
            error: result.error,
        })
    }

    /// Plain text of the message, if it has any.
    pub fn content(&self) -> &str {
        match self {
            Self::User(m) => &m.content,
            Self::Assistant(m) => &m.content,
            Self::System(m) => &m.content,
            Self::ToolResult(m) => &m.content,
            Self::ToolCall(_) => "",
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        match self {
            Self::Assistant(m) => m.usage,
            Self::ToolCall(m) => m.usage,
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallMessage> {
        match self {
            Self::ToolCall(call) => Some(call),
            _ => None,
        }
    }
}

/// Resolve the call ID that pairs each `ToolCall` with its `ToolResult`.
///
/// Returns one entry per message: `Some(id)` for tool calls and tool results,
/// `None` for everything else. Backend-supplied IDs are used as-is. A call
/// without an ID gets `call_<position>`; a result without an ID pairs with the
/// oldest call that has no result yet.
pub fn thread_call_ids(history: &[Message]) -> Vec<Option<String>> {
    let mut pending: VecDeque<String> = VecDeque::new();
    history
        .iter()
        .enumerate()
        .map(|(pos, msg)| match msg {
            Message::ToolCall(call) => {
                let id = call.call_id.clone().unwrap_or_else(|| format!("call_{pos}"));
                pending.push_back(id.clone());
                Some(id)
            }
            Message::ToolResult(result) => match &result.call_id {
                Some(id) => {
                    pending.retain(|p| p != id);
                    Some(id.clone())
                }
                None => Some(
                    pending
                        .pop_front()
                        .unwrap_or_else(|| format!("call_{pos}")),
                ),
            },
            _ => None,
        })
        .collect()
}
