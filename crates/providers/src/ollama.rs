//! Ollama native chat adapter (`/api/chat`).
//!
//! Tools go in the native `tools` slot, but Ollama has no tool-choice
//! parameter: forcing is expressed as a trailing system directive built by
//! [`ToolPlan::directive`]. Streaming responses are newline-delimited JSON.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convoke_core::choice::{ToolChoice, ToolPlan};
use convoke_core::context::CallContext;
use convoke_core::error::ProviderError;
use convoke_core::message::{Message, Usage, thread_call_ids};
use convoke_core::provider::{AdapterOptions, ChatAdapter};
use convoke_core::registry::Registry;
use convoke_core::stream::{StreamEvent, merge_events, merge_stream};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transport;

pub const OLLAMA_URL: &str = "http://localhost:11434";

pub struct OllamaAdapter {
    name: String,
    base_url: String,
    options: AdapterOptions,
    registry: Option<Arc<dyn Registry>>,
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new(base_url: Option<&str>, options: AdapterOptions, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            name: "ollama".into(),
            base_url: base_url.unwrap_or(OLLAMA_URL).trim_end_matches('/').to_string(),
            options,
            registry: None,
            client: transport::client(timeout)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn build_request(&self, history: &[Message], plan: &ToolPlan, thinking: bool) -> serde_json::Value {
        let mut messages = to_api_messages(history);
        if let Some(directive) = plan.directive() {
            messages.push(ApiMessage::text("system", directive));
        }

        let mut options = serde_json::json!({ "num_predict": self.options.max_tokens });
        if let Some(temperature) = self.options.temperature {
            options["temperature"] = serde_json::json!(temperature);
        }

        let mut body = serde_json::json!({
            "model": self.options.model,
            "messages": messages,
            "stream": self.options.stream,
            "options": options,
        });
        if thinking {
            body["think"] = serde_json::json!(true);
        }
        if plan.has_tools() {
            let tools: Vec<serde_json::Value> = plan
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = serde_json::json!(tools);
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
            provider = "ollama",
            model = %self.options.model,
            tools = plan.tools.len(),
            choice = ?plan.choice,
            thinking,
            stream = self.options.stream,
            "Sending chat request"
        );

        let request = self.client.post(format!("{}/api/chat", self.base_url)).json(&body);
        let response = transport::send(ctx, &self.name, request).await?;

        if self.options.stream {
            merge_stream(ctx, &self.name, decode_ndjson(Box::pin(response.bytes_stream()))).await
        } else {
            let value = transport::json_body(ctx, &self.name, response).await?;
            let chunk: ChatChunk = serde_json::from_value(value).map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Ollama response: {e}"),
            })?;
            let mut events = ChunkDecoder::default().decode(chunk)?;
            events.push(StreamEvent::Done);
            merge_events(ctx, &self.name, events).await
        }
    }
}

#[async_trait]
impl ChatAdapter for OllamaAdapter {
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
        self.turn(ctx, history, choice, false).await
    }
}

fn to_api_messages(history: &[Message]) -> Vec<ApiMessage> {
    let ids = thread_call_ids(history);
    let mut call_names: HashMap<String, String> = HashMap::new();

    history
        .iter()
        .zip(ids)
        .map(|(msg, id)| match msg {
            Message::User(m) => ApiMessage {
                images: m.images.iter().map(|img| img.data.clone()).collect(),
                ..ApiMessage::text("user", m.content.clone())
            },
            Message::Assistant(m) => ApiMessage::text("assistant", m.content.clone()),
            Message::System(m) => ApiMessage::text("system", m.content.clone()),
            Message::ToolCall(call) => {
                if let Some(id) = id {
                    call_names.insert(id, call.tool_name.clone());
                }
                ApiMessage {
                    tool_calls: vec![ApiToolCall {
                        function: ApiFunction {
                            name: call.tool_name.clone(),
                            arguments: serde_json::Value::Object(call.arguments.clone()),
                        },
                    }],
                    ..ApiMessage::text("assistant", String::new())
                }
            }
            Message::ToolResult(result) => ApiMessage {
                tool_name: id.and_then(|id| call_names.get(&id).cloned()),
                ..ApiMessage::text("tool", result.rendered())
            },
        })
        .collect()
}

/// Turns NDJSON chunks into events, numbering tool calls across chunks.
#[derive(Default)]
struct ChunkDecoder {
    next_tool: u32,
}

impl ChunkDecoder {
    fn decode(&mut self, chunk: ChatChunk) -> Result<Vec<StreamEvent>, ProviderError> {
        if let Some(error) = chunk.error {
            return Err(ProviderError::StreamInterrupted(error));
        }

        let mut events = Vec::new();
        if chunk.done {
            events.push(StreamEvent::Usage(Usage::new(
                chunk.prompt_eval_count.unwrap_or(0),
                chunk.eval_count.unwrap_or(0),
            )));
        }
        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ThinkingDelta(thinking));
            }
            if !message.content.is_empty() {
                events.push(StreamEvent::TextDelta(message.content));
            }
            for call in message.tool_calls {
                let index = self.next_tool;
                self.next_tool += 1;
                events.push(StreamEvent::ToolCallFragment {
                    index,
                    id: call.id,
                    name: Some(call.function.name),
                    arguments: call.function.arguments.to_string(),
                });
                events.push(StreamEvent::ToolCallEnd { index });
            }
        }
        Ok(events)
    }
}

/// Decode a newline-delimited JSON body into stream events.
fn decode_ndjson<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = ChunkDecoder::default();
    transport::lines(bytes).flat_map(move |line| {
        let decoded = line.and_then(|line| {
            let line = line.trim();
            if line.is_empty() {
                return Ok(Vec::new());
            }
            match serde_json::from_str::<ChatChunk>(line) {
                Ok(chunk) => {
                    let done = chunk.done;
                    let mut events = decoder.decode(chunk)?;
                    if done {
                        events.push(StreamEvent::Done);
                    }
                    Ok(events)
                }
                Err(e) => {
                    warn!(error = %e, line, "Ignoring unparseable Ollama chunk");
                    Ok(Vec::new())
                }
            }
        });
        let decoded: Vec<Result<StreamEvent, ProviderError>> = match decoded {
            Ok(events) => events.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(decoded)
    })
}

// --- Ollama API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            images: Vec::new(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ApiFunction,
}
