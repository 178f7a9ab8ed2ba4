//! Anthropic native adapter.
//!
//! Uses Anthropic's Messages API directly (not an OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Native tool choice (`auto`, `any`, `tool`)
//! - Streaming via SSE with typed `content_block_*` events
//! - Extended thinking with a token budget

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convoke_core::choice::{ToolChoice, ToolPlan};
use convoke_core::context::CallContext;
use convoke_core::error::ProviderError;
use convoke_core::message::{Message, Usage, thread_call_ids};
use convoke_core::provider::{AdapterOptions, ChatAdapter, ToolDefinition};
use convoke_core::registry::Registry;
use convoke_core::stream::{StreamEvent, merge_events, merge_stream};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transport;

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API adapter.
pub struct AnthropicAdapter {
    name: String,
    base_url: String,
    api_key: String,
    options: AdapterOptions,
    registry: Option<Arc<dyn Registry>>,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, options: AdapterOptions, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "anthropic".into(),
            base_url: ANTHROPIC_URL.into(),
            api_key: api_key.into(),
            options,
            registry: None,
            client: transport::client(timeout)?,
        })
    }

    /// Create with a custom base URL (e.g., for proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The complete request body for one turn.
    pub(crate) fn build_request(&self, history: &[Message], plan: &ToolPlan, thinking: bool) -> serde_json::Value {
        let (system, messages) = to_api_messages(history);
        let budget = self.options.thinking_budget.filter(|_| thinking);

        // The thinking budget is spent out of max_tokens.
        let max_tokens = match budget {
            Some(budget) => self.options.max_tokens.saturating_add(budget),
            None => self.options.max_tokens,
        };

        let mut body = serde_json::json!({
            "model": self.options.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "stream": self.options.stream,
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if let Some(budget) = budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget,
            });
        } else if let Some(temperature) = self.options.temperature {
            // Temperature is rejected alongside thinking.
            body["temperature"] = serde_json::json!(temperature);
        }
        if plan.has_tools() {
            body["tools"] = serde_json::json!(to_api_tools(&plan.tools));
            body["tool_choice"] = api_tool_choice(&plan.choice);
        }
        body
    }

    async fn turn(
        &self,
        ctx: &CallContext,
        history: &[Message],
        choice: &ToolChoice,
        thinking: bool,
    ) -> Result<Message, ProviderError> {
        let plan = ToolPlan::resolve(self.registry.as_deref(), choice)?;
        let body = self.build_request(history, &plan, thinking);

        debug!(
            provider = "anthropic",
            model = %self.options.model,
            tools = plan.tools.len(),
            choice = ?plan.choice,
            thinking,
            stream = self.options.stream,
            "Sending messages request"
        );

        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body);

        let response = transport::send(ctx, &self.name, request).await?;

        if self.options.stream {
            merge_stream(ctx, &self.name, decode_sse(Box::pin(response.bytes_stream()))).await
        } else {
            let value = transport::json_body(ctx, &self.name, response).await?;
            let parsed: AnthropicResponse = serde_json::from_value(value).map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;
            merge_events(ctx, &self.name, decode_response(parsed)).await
        }
    }
}

#[async_trait]
impl ChatAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_registry(&mut self, registry: Arc<dyn Registry>) {
        self.registry = Some(registry);
    }

    async fn chat(&self, ctx: &CallContext, history: &[Message], enable_thinking: bool) -> Result<Message, ProviderError> {
        self.turn(ctx, history, &ToolChoice::Auto, enable_thinking).await
    }

    async fn chat_with_tool_choice(
        &self,
        ctx: &CallContext,
        history: &[Message],
        choice: &ToolChoice,
    ) -> Result<Message, ProviderError> {
        // Forced tool use cannot be combined with extended thinking.
        self.turn(ctx, history, choice, false).await
    }
}

/// Split out the system prompt and convert the rest to content-block messages.
///
/// Consecutive messages with the same role are folded into one, since the
/// API expects user and assistant turns to alternate.
fn to_api_messages(history: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
    let ids = thread_call_ids(history);
    let mut system_parts: Vec<&str> = Vec::new();
    let mut result: Vec<AnthropicMessage> = Vec::new();

    for (msg, id) in history.iter().zip(ids) {
        let (role, blocks) = match msg {
            Message::System(m) => {
                system_parts.push(&m.content);
                continue;
            }
            Message::User(m) => {
                let mut blocks: Vec<ContentBlock> = m
                    .images
                    .iter()
                    .map(|img| ContentBlock::Image {
                        source: ImageSource {
                            r#type: "base64".into(),
                            media_type: img.media_type.clone(),
                            data: img.data.clone(),
                        },
                    })
                    .collect();
                blocks.push(ContentBlock::Text { text: m.content.clone() });
                ("user", blocks)
            }
            Message::Assistant(m) => ("assistant", vec![ContentBlock::Text { text: m.content.clone() }]),
            Message::ToolCall(call) => (
                "assistant",
                vec![ContentBlock::ToolUse {
                    id: id.unwrap_or_default(),
                    name: call.tool_name.clone(),
                    input: serde_json::Value::Object(call.arguments.clone()),
                }],
            ),
            Message::ToolResult(r) => (
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id: id.unwrap_or_default(),
                    content: r.rendered(),
                    is_error: r.is_error(),
                }],
            ),
        };

        match result.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => result.push(AnthropicMessage {
                role: role.into(),
                content: blocks,
            }),
        }
    }

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, result)
}

/// Convert tool definitions to Anthropic format.
fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.clone(),
        })
        .collect()
}

fn api_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::None => serde_json::json!({ "type": "none" }),
        ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
        ToolChoice::Any => serde_json::json!({ "type": "any" }),
        ToolChoice::Named(name) => serde_json::json!({ "type": "tool", "name": name }),
    }
}

/// Express a single-shot response as stream events.
fn decode_response(response: AnthropicResponse) -> Vec<StreamEvent> {
    let mut events = vec![StreamEvent::Usage(Usage::new(
        response.usage.input_tokens,
        response.usage.output_tokens,
    ))];
    let mut tool_index = 0u32;
    for block in response.content {
        match block {
            ResponseContentBlock::Text { text } => events.push(StreamEvent::TextDelta(text)),
            ResponseContentBlock::Thinking { thinking } => events.push(StreamEvent::ThinkingDelta(thinking)),
            ResponseContentBlock::ToolUse { id, name, input } => {
                events.push(StreamEvent::ToolCallFragment {
                    index: tool_index,
                    id: Some(id),
                    name: Some(name),
                    arguments: input.to_string(),
                });
                events.push(StreamEvent::ToolCallEnd { index: tool_index });
                tool_index += 1;
            }
            ResponseContentBlock::Other => {}
        }
    }
    events.push(StreamEvent::Done);
    events
}

/// Events carried by one typed SSE payload.
fn decode_event(data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, data, "Ignoring unparseable Anthropic SSE");
            return Ok(Vec::new());
        }
    };

    let index = event["index"].as_u64().unwrap_or(0) as u32;
    let events = match event["type"].as_str().unwrap_or("") {
        "message_start" => {
            let usage = &event["message"]["usage"];
            vec![StreamEvent::Usage(Usage::new(
                usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                usage["output_tokens"].as_u64().unwrap_or(0) as u32,
            ))]
        }
        "content_block_start" => {
            let block = &event["content_block"];
            match block["type"].as_str() {
                Some("tool_use") => vec![StreamEvent::ToolCallFragment {
                    index,
                    id: block["id"].as_str().map(String::from),
                    name: block["name"].as_str().map(String::from),
                    arguments: String::new(),
                }],
                Some("text") => block["text"]
                    .as_str()
                    .filter(|t| !t.is_empty())
                    .map(|t| vec![StreamEvent::TextDelta(t.into())])
                    .unwrap_or_default(),
                _ => Vec::new(),
            }
        }
        "content_block_delta" => {
            let delta = &event["delta"];
            match delta["type"].as_str() {
                Some("text_delta") => delta["text"]
                    .as_str()
                    .map(|t| vec![StreamEvent::TextDelta(t.into())])
                    .unwrap_or_default(),
                Some("thinking_delta") => delta["thinking"]
                    .as_str()
                    .map(|t| vec![StreamEvent::ThinkingDelta(t.into())])
                    .unwrap_or_default(),
                Some("input_json_delta") => delta["partial_json"]
                    .as_str()
                    .map(|p| {
                        vec![StreamEvent::ToolCallFragment {
                            index,
                            id: None,
                            name: None,
                            arguments: p.into(),
                        }]
                    })
                    .unwrap_or_default(),
                _ => Vec::new(),
            }
        }
        "content_block_stop" => vec![StreamEvent::ToolCallEnd { index }],
        "message_delta" => event["usage"]["output_tokens"]
            .as_u64()
            .map(|out| vec![StreamEvent::Usage(Usage::new(0, out as u32))])
            .unwrap_or_default(),
        "message_stop" => vec![StreamEvent::Done],
        "error" => {
            let message = event["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(ProviderError::StreamInterrupted(message.to_string()));
        }
        _ => Vec::new(),
    };
    Ok(events)
}

/// Decode an SSE body into stream events.
fn decode_sse<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    transport::sse_events(Box::pin(transport::lines(bytes))).flat_map(|event| {
        let decoded: Vec<Result<StreamEvent, ProviderError>> = match event.and_then(|ev| decode_event(&ev.data)) {
            Ok(events) => events.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(decoded)
    })
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageSource {
    r#type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoke_core::registry::ToolRegistry;
    use convoke_core::tool::{Tool, ToolResult, handler_fn};

    fn adapter(stream: bool) -> AnthropicAdapter {
        let mut opts = AdapterOptions::new("claude-sonnet-4", 1024).streaming(stream);
        opts.thinking_budget = Some(2048);
        opts.temperature = Some(0.3);
        let mut adapter = AnthropicAdapter::new("sk-ant-test", opts, Duration::from_secs(5)).unwrap();
        let make = |name: &str| Tool::new(name, format!("tool {name}"), handler_fn(|_ctx, _args| async { Ok(ToolResult::ok("")) }));
        let registry = ToolRegistry::new().with_tool(make("x")).unwrap().with_tool(make("y")).unwrap();
        adapter.set_registry(Arc::new(registry));
        adapter
    }

    fn plan(adapter: &AnthropicAdapter, choice: ToolChoice) -> ToolPlan {
        ToolPlan::resolve(adapter.registry.as_deref(), &choice).unwrap()
    }

    #[test]
    fn constructor_with_base_url() {
        let adapter = adapter(false).with_base_url("https://proxy.example.com/");
        assert_eq!(adapter.name(), "anthropic");
        assert_eq!(adapter.base_url(), "https://proxy.example.com");
    }

    #[test]
    fn named_choice_declares_only_that_tool() {
        let adapter = adapter(false);
        let body = adapter.build_request(&[Message::user("hi")], &plan(&adapter, ToolChoice::Named("x".into())), false);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "x");
        assert_eq!(body["tool_choice"], serde_json::json!({"type": "tool", "name": "x"}));
    }

    #[test]
    fn none_choice_omits_tools_and_any_maps_natively() {
        let adapter = adapter(false);
        let body = adapter.build_request(&[], &plan(&adapter, ToolChoice::None), false);
        assert!(body.get("tools").is_none());

        let body = adapter.build_request(&[], &plan(&adapter, ToolChoice::Any), false);
        assert_eq!(body["tool_choice"]["type"], "any");
    }

    #[test]
    fn thinking_adds_budget_and_drops_temperature() {
        let adapter = adapter(false);
        let body = adapter.build_request(&[], &plan(&adapter, ToolChoice::Auto), true);
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert_eq!(body["max_tokens"], 1024 + 2048);
        assert!(body.get("temperature").is_none());

        let body = adapter.build_request(&[], &plan(&adapter, ToolChoice::Auto), false);
        assert!(body.get("thinking").is_none());
        assert_eq!(body["max_tokens"], 1024);
        assert!(body.get("temperature").is_some());
    }

    #[test]
    fn system_extraction_and_block_conversion() {
        let history = vec![
            Message::system("be brief"),
            Message::system("be kind"),
            Message::user("read a"),
            Message::tool_call(Some("toolu_1".into()), "read_file", serde_json::json!({"path": "a"}).as_object().cloned().unwrap()),
            Message::tool_result(None, ToolResult::error("File not found: a")),
            Message::user("then stop"),
        ];
        let (system, messages) = to_api_messages(&history);
        assert_eq!(system.as_deref(), Some("be brief\n\nbe kind"));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, "assistant");

        let json = serde_json::to_value(&messages).unwrap();
        assert_eq!(json[1]["content"][0]["type"], "tool_use");
        assert_eq!(json[1]["content"][0]["input"]["path"], "a");
        // The tool result and the following user text share one user turn.
        assert_eq!(json[2]["content"][0]["type"], "tool_result");
        assert_eq!(json[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(json[2]["content"][0]["is_error"], true);
        assert_eq!(json[2]["content"][1]["text"], "then stop");
    }

    #[tokio::test]
    async fn parse_tool_use_response() {
        let data = r#"{
            "id": "msg_1", "model": "claude", "stop_reason": "tool_use",
            "content": [
                {"type": "thinking", "thinking": "need the file", "signature": "abc"},
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "a"}},
                {"type": "tool_use", "id": "toolu_2", "name": "list_directory", "input": {}}
            ],
            "usage": {"input_tokens": 50, "output_tokens": 20}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(data).unwrap();
        let msg = merge_events(&CallContext::new(), "anthropic", decode_response(parsed)).await.unwrap();
        let call = msg.as_tool_call().unwrap();
        assert_eq!(call.tool_name, "read_file");
        assert_eq!(call.call_id.as_deref(), Some("toolu_1"));
        assert_eq!(call.arguments["path"], "a");
        assert_eq!(call.usage.unwrap().total_tokens, 70);
    }

    #[tokio::test]
    async fn parse_thinking_response() {
        let data = r#"{"content": [
            {"type": "thinking", "thinking": "hmm"},
            {"type": "redacted_thinking", "data": "xyz"},
            {"type": "text", "text": "Answer"}
        ], "usage": {"input_tokens": 1, "output_tokens": 2}}"#;
        let parsed: AnthropicResponse = serde_json::from_str(data).unwrap();
        match merge_events(&CallContext::new(), "anthropic", decode_response(parsed)).await.unwrap() {
            Message::Assistant(m) => {
                assert_eq!(m.content, "Answer");
                assert_eq!(m.thinking.as_deref(), Some("hmm"));
            }
            other => panic!("Expected assistant message, got {other:?}"),
        }
    }

    fn sse(body: &'static str) -> impl Stream<Item = Result<&'static [u8], std::io::Error>> + Unpin {
        futures::stream::iter(body.as_bytes().chunks(7).map(Ok).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn streamed_thinking_and_text() {
        let body = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":9,\"output_tokens\":1}}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"thi\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"nk\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":6}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        match merge_stream(&CallContext::new(), "anthropic", decode_sse(sse(body))).await.unwrap() {
            Message::Assistant(m) => {
                assert_eq!(m.content, "Hello");
                assert_eq!(m.thinking.as_deref(), Some("think"));
                assert_eq!(m.usage, Some(Usage::new(9, 6)));
            }
            other => panic!("Expected assistant message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streamed_tool_use_assembles_partial_json() {
        let body = concat!(
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_9\",\"name\":\"find_files\",\"input\":{}}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"pattern\\\": \"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"*.rs\\\"}\"}}\n\n",
            "data: {\"type\":\"content_block_stop\",\"index\":1}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":2,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_10\",\"name\":\"read_file\",\"input\":{}}}\n\n",
        );
        let msg = merge_stream(&CallContext::new(), "anthropic", decode_sse(sse(body))).await.unwrap();
        let call = msg.as_tool_call().unwrap();
        assert_eq!(call.tool_name, "find_files");
        assert_eq!(call.call_id.as_deref(), Some("toolu_9"));
        assert_eq!(call.arguments["pattern"], "*.rs");
    }

    #[tokio::test]
    async fn stream_without_message_stop_is_interrupted() {
        let body = concat!(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"The answer is 4\"}}\n\n",
        );
        let err = merge_stream(&CallContext::new(), "anthropic", decode_sse(sse(body))).await.unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
    }

    #[tokio::test]
    async fn stream_error_event() {
        let body = "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";
        let err = merge_stream(&CallContext::new(), "anthropic", decode_sse(sse(body))).await.unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(ref m) if m == "Overloaded"));
    }
}
