//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, OpenRouter, vLLM, Together AI, Fireworks AI and any
//! endpoint exposing `/chat/completions`. Tool declarations go in the native
//! `tools` slot and tool choice maps onto the native `tool_choice` field.
//! `reasoning_content` deltas (DeepSeek, vLLM reasoning parsers) are
//! collected as thinking whether or not thinking was requested.

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

pub const OPENAI_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";

/// An adapter for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatAdapter {
    name: String,
    base_url: String,
    api_key: Option<String>,
    options: AdapterOptions,
    registry: Option<Arc<dyn Registry>>,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        options: AdapterOptions,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            options,
            registry: None,
            client: transport::client(timeout)?,
        })
    }

    /// Create an OpenAI adapter (convenience constructor).
    pub fn openai(api_key: impl Into<String>, options: AdapterOptions, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new("openai", OPENAI_URL, Some(api_key.into()), options, timeout)
    }

    /// Create an OpenRouter adapter (convenience constructor).
    pub fn openrouter(api_key: impl Into<String>, options: AdapterOptions, timeout: Duration) -> Result<Self, ProviderError> {
        Self::new("openrouter", OPENROUTER_URL, Some(api_key.into()), options, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn options(&self) -> &AdapterOptions {
        &self.options
    }

    /// The complete request body for one turn.
    pub(crate) fn build_request(&self, history: &[Message], plan: &ToolPlan) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.options.model,
            "messages": to_api_messages(history),
            "max_tokens": self.options.max_tokens,
            "stream": self.options.stream,
        });

        if let Some(temperature) = self.options.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if self.options.stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if plan.has_tools() {
            body["tools"] = serde_json::json!(to_api_tools(&plan.tools));
            body["tool_choice"] = api_tool_choice(&plan.choice);
        }
        body
    }

    async fn turn(&self, ctx: &CallContext, history: &[Message], choice: &ToolChoice) -> Result<Message, ProviderError> {
        let plan = ToolPlan::resolve(self.registry.as_deref(), choice)?;
        let body = self.build_request(history, &plan);

        debug!(
            provider = %self.name,
            model = %self.options.model,
            tools = plan.tools.len(),
            choice = ?plan.choice,
            stream = self.options.stream,
            "Sending chat completion request"
        );

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        if self.options.stream {
            request = request.header("Accept", "text/event-stream");
        }

        let response = transport::send(ctx, &self.name, request).await?;

        if self.options.stream {
            let events = decode_sse(Box::pin(response.bytes_stream()), self.name.clone());
            merge_stream(ctx, &self.name, events).await
        } else {
            let value = transport::json_body(ctx, &self.name, response).await?;
            let parsed: ApiResponse = serde_json::from_value(value).map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;
            merge_events(ctx, &self.name, decode_response(parsed)).await
        }
    }
}

#[async_trait]
impl ChatAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_registry(&mut self, registry: Arc<dyn Registry>) {
        self.registry = Some(registry);
    }

    async fn chat(&self, ctx: &CallContext, history: &[Message], _enable_thinking: bool) -> Result<Message, ProviderError> {
        self.turn(ctx, history, &ToolChoice::Auto).await
    }

    async fn chat_with_tool_choice(
        &self,
        ctx: &CallContext,
        history: &[Message],
        choice: &ToolChoice,
    ) -> Result<Message, ProviderError> {
        self.turn(ctx, history, choice).await
    }
}

/// Convert history to OpenAI API messages.
fn to_api_messages(history: &[Message]) -> Vec<ApiMessage> {
    let ids = thread_call_ids(history);
    history
        .iter()
        .zip(ids)
        .map(|(msg, id)| match msg {
            Message::User(m) if m.images.is_empty() => ApiMessage::text("user", &m.content),
            Message::User(m) => {
                let mut parts = vec![serde_json::json!({"type": "text", "text": m.content})];
                parts.extend(m.images.iter().map(|img| {
                    serde_json::json!({
                        "type": "image_url",
                        "image_url": {"url": format!("data:{};base64,{}", img.media_type, img.data)},
                    })
                }));
                ApiMessage {
                    role: "user".into(),
                    content: Some(serde_json::Value::Array(parts)),
                    tool_calls: None,
                    tool_call_id: None,
                }
            }
            Message::Assistant(m) => ApiMessage::text("assistant", &m.content),
            Message::System(m) => ApiMessage::text("system", &m.content),
            Message::ToolCall(call) => ApiMessage {
                role: "assistant".into(),
                content: None,
                tool_calls: Some(vec![ApiToolCall {
                    id: id.unwrap_or_default(),
                    r#type: "function".into(),
                    function: ApiFunction {
                        name: call.tool_name.clone(),
                        arguments: serde_json::Value::Object(call.arguments.clone()).to_string(),
                    },
                }]),
                tool_call_id: None,
            },
            Message::ToolResult(result) => ApiMessage {
                role: "tool".into(),
                content: Some(serde_json::Value::String(result.rendered())),
                tool_calls: None,
                tool_call_id: id,
            },
        })
        .collect()
}

/// Convert tool definitions to OpenAI API format.
fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
    tools
        .iter()
        .map(|t| ApiToolDefinition {
            r#type: "function".into(),
            function: ApiToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        })
        .collect()
}

fn api_tool_choice(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::None => serde_json::json!("none"),
        ToolChoice::Auto => serde_json::json!("auto"),
        ToolChoice::Any => serde_json::json!("required"),
        ToolChoice::Named(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

/// Express a single-shot response as stream events.
fn decode_response(response: ApiResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if let Some(usage) = response.usage {
        events.push(StreamEvent::Usage(usage.into()));
    }
    let Some(choice) = response.choices.into_iter().next() else {
        return events;
    };
    let message = choice.message;
    if let Some(reasoning) = message.reasoning_content.filter(|r| !r.is_empty()) {
        events.push(StreamEvent::ThinkingDelta(reasoning));
    }
    if let Some(content) = message.content.filter(|c| !c.is_empty()) {
        events.push(StreamEvent::TextDelta(content));
    }
    for (index, call) in message.tool_calls.unwrap_or_default().into_iter().enumerate() {
        let index = index as u32;
        events.push(StreamEvent::ToolCallFragment {
            index,
            id: Some(call.id),
            name: Some(call.function.name),
            arguments: call.function.arguments,
        });
        events.push(StreamEvent::ToolCallEnd { index });
    }
    events.push(StreamEvent::Done);
    events
}

/// Turns SSE `data:` payloads into events, remembering which tool call
/// arrived first so `finish_reason: "tool_calls"` can close it.
#[derive(Debug)]
struct ChunkDecoder {
    provider: String,
    first_tool: Option<u32>,
}

impl ChunkDecoder {
    fn new(provider: String) -> Self {
        Self {
            provider,
            first_tool: None,
        }
    }

    fn decode(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
        if data == transport::DONE_MARKER {
            return Ok(vec![StreamEvent::Done]);
        }
        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(provider = %self.provider, data, error = %e, "Ignoring unparseable SSE chunk");
                return Ok(Vec::new());
            }
        };
        if let Some(error) = chunk.error {
            return Err(ProviderError::StreamInterrupted(error.to_string()));
        }

        let mut events = Vec::new();
        let mut tool_calls_finished = false;
        if let Some(choice) = chunk.choices.into_iter().next() {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                events.push(StreamEvent::ThinkingDelta(reasoning));
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                events.push(StreamEvent::TextDelta(content));
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                let Some(index) = tc.index else {
                    return Err(ProviderError::MalformedToolCall {
                        tool_name: name.unwrap_or_default(),
                        reason: "tool call fragment has no index".into(),
                    });
                };
                self.first_tool.get_or_insert(index);
                events.push(StreamEvent::ToolCallFragment {
                    index,
                    id: tc.id,
                    name,
                    arguments,
                });
            }
            tool_calls_finished = choice.finish_reason.as_deref() == Some("tool_calls");
        }
        // With include_usage the usage chunk follows a "stop" finish, so only
        // a tool-call finish ends the turn early.
        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage(usage.into()));
        }
        if tool_calls_finished && let Some(index) = self.first_tool {
            events.push(StreamEvent::ToolCallEnd { index });
        }
        Ok(events)
    }
}

/// Decode an SSE body into stream events.
fn decode_sse<S, B, E>(bytes: S, provider: String) -> impl Stream<Item = Result<StreamEvent, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = ChunkDecoder::new(provider);
    transport::sse_events(Box::pin(transport::lines(bytes))).flat_map(move |event| {
        let decoded: Vec<Result<StreamEvent, ProviderError>> = match event.and_then(|ev| decoder.decode(&ev.data)) {
            Ok(events) => events.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures::stream::iter(decoded)
    })
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(serde_json::Value::String(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage::new(u.prompt_tokens, u.completion_tokens)
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoke_core::registry::ToolRegistry;
    use convoke_core::tool::{Tool, ToolResult, handler_fn};
    use convoke_core::{ImageData, ToolArgs};

    fn adapter(stream: bool) -> OpenAiCompatAdapter {
        let mut adapter = OpenAiCompatAdapter::openai(
            "sk-test",
            AdapterOptions::new("gpt-4o", 1024).streaming(stream),
            Duration::from_secs(5),
        )
        .unwrap();
        let make = |name: &str| Tool::new(name, format!("tool {name}"), handler_fn(|_ctx, _args: ToolArgs| async { Ok(ToolResult::ok("")) }));
        let registry = ToolRegistry::new().with_tool(make("x")).unwrap().with_tool(make("y")).unwrap();
        adapter.set_registry(Arc::new(registry));
        adapter
    }

    fn plan(adapter: &OpenAiCompatAdapter, choice: ToolChoice) -> ToolPlan {
        ToolPlan::resolve(adapter.registry.as_deref(), &choice).unwrap()
    }

    #[test]
    fn constructors() {
        let opts = AdapterOptions::new("m", 10);
        let router = OpenAiCompatAdapter::openrouter("k", opts.clone(), Duration::from_secs(1)).unwrap();
        assert_eq!(router.name(), "openrouter");
        assert!(router.base_url().contains("openrouter.ai"));

        let custom = OpenAiCompatAdapter::new("vllm", "http://localhost:8000/v1/", None, opts, Duration::from_secs(1)).unwrap();
        assert_eq!(custom.base_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn named_choice_declares_only_that_tool() {
        let adapter = adapter(false);
        let body = adapter.build_request(&[Message::user("hi")], &plan(&adapter, ToolChoice::Named("x".into())));
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["function"]["name"], "x");
        assert_eq!(body["tool_choice"]["function"]["name"], "x");
    }

    #[test]
    fn choice_modes_map_to_native_field() {
        let adapter = adapter(true);
        let body = adapter.build_request(&[], &plan(&adapter, ToolChoice::Any));
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"].as_array().unwrap().len(), 2);
        assert_eq!(body["stream_options"]["include_usage"], true);

        let body = adapter.build_request(&[], &plan(&adapter, ToolChoice::Auto));
        assert_eq!(body["tool_choice"], "auto");

        let body = adapter.build_request(&[], &plan(&adapter, ToolChoice::None));
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn history_conversion_threads_call_ids() {
        let history = vec![
            Message::system("be brief"),
            Message::user_with_images(
                "what is this",
                vec![ImageData {
                    media_type: "image/png".into(),
                    data: "AAAA".into(),
                }],
            ),
            Message::tool_call(None, "read_file", serde_json::json!({"path": "a"}).as_object().cloned().unwrap()),
            Message::tool_result(None, ToolResult::error("missing")),
        ];
        let api = to_api_messages(&history);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].content.as_ref().unwrap()[1]["image_url"]["url"], "data:image/png;base64,AAAA");

        let call = &api[2].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.id, "call_2");
        assert_eq!(call.function.arguments, r#"{"path":"a"}"#);
        assert_eq!(api[3].role, "tool");
        assert_eq!(api[3].tool_call_id.as_deref(), Some("call_2"));
        assert_eq!(api[3].content.as_ref().unwrap(), "Error: missing");
    }

    #[tokio::test]
    async fn single_shot_response_decodes_first_tool_call() {
        let data = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"call_a","type":"function","function":{"name":"read_file","arguments":"{\"path\":\"a\"}"}},
            {"id":"call_b","type":"function","function":{"name":"write_file","arguments":"{}"}}
        ]}}],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let msg = merge_events(&CallContext::new(), "openai", decode_response(parsed)).await.unwrap();
        let call = msg.as_tool_call().unwrap();
        assert_eq!(call.tool_name, "read_file");
        assert_eq!(call.call_id.as_deref(), Some("call_a"));
        assert_eq!(call.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn single_shot_text_with_reasoning() {
        let data = r#"{"choices":[{"message":{"content":"4","reasoning_content":"2+2"}}]}"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        match merge_events(&CallContext::new(), "openai", decode_response(parsed)).await.unwrap() {
            Message::Assistant(m) => {
                assert_eq!(m.content, "4");
                assert_eq!(m.thinking.as_deref(), Some("2+2"));
            }
            other => panic!("Expected assistant message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_empty_response() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        let err = merge_events(&CallContext::new(), "openai", decode_response(parsed)).await.unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse { .. }));
    }

    fn sse(body: &'static str) -> impl Stream<Item = Result<&'static [u8], std::io::Error>> + Unpin {
        // Split mid-line to exercise buffering.
        let (a, b) = body.split_at(body.len() / 2);
        futures::stream::iter(vec![Ok(a.as_bytes()), Ok(b.as_bytes())])
    }

    #[tokio::test]
    async fn streamed_text_and_reasoning_merge() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"thi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"nk\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        let msg = merge_stream(&CallContext::new(), "openai", decode_sse(sse(body), "openai".into()))
            .await
            .unwrap();
        match msg {
            Message::Assistant(m) => {
                assert_eq!(m.content, "Hello");
                assert_eq!(m.thinking.as_deref(), Some("think"));
                assert_eq!(m.usage, Some(Usage::new(5, 2)));
            }
            other => panic!("Expected assistant message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn streamed_tool_call_fragments_and_second_call_dropped() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"edit_file\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"path\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"a.rs\\\"}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_2\",\"function\":{\"name\":\"read_file\",\"arguments\":\"{\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let msg = merge_stream(&CallContext::new(), "openai", decode_sse(sse(body), "openai".into()))
            .await
            .unwrap();
        let call = msg.as_tool_call().unwrap();
        assert_eq!(call.tool_name, "edit_file");
        assert_eq!(call.call_id.as_deref(), Some("call_1"));
        assert_eq!(call.arguments["path"], "a.rs");
    }

    #[tokio::test]
    async fn tool_calls_finish_ends_the_turn() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_9\",\"function\":{\"name\":\"find_files\",\"arguments\":\"{}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"error\":{\"message\":\"read past the finished call\"}}\n\n",
        );
        let msg = merge_stream(&CallContext::new(), "openai", decode_sse(sse(body), "openai".into()))
            .await
            .unwrap();
        assert_eq!(msg.as_tool_call().unwrap().tool_name, "find_files");
    }

    #[tokio::test]
    async fn stream_without_done_is_interrupted() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"The answer is \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"4\"}}]}\n\n",
        );
        let err = merge_stream(&CallContext::new(), "openai", decode_sse(sse(body), "openai".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
    }

    #[tokio::test]
    async fn tool_fragment_without_index_is_malformed() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"id\":\"x\",\"function\":{\"name\":\"read_file\"}}]}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let err = merge_stream(&CallContext::new(), "openai", decode_sse(sse(body), "openai".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedToolCall { ref tool_name, .. } if tool_name == "read_file"));
    }

    #[tokio::test]
    async fn unparseable_chunks_are_skipped() {
        let body = concat!(
            "data: {not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let msg = merge_stream(&CallContext::new(), "openai", decode_sse(sse(body), "openai".into()))
            .await
            .unwrap();
        assert_eq!(msg.content(), "ok");
    }

    #[tokio::test]
    async fn stream_error_payload_is_surfaced() {
        let body = "data: {\"error\":{\"message\":\"overloaded\"}}\n\n";
        let err = merge_stream(&CallContext::new(), "openai", decode_sse(sse(body), "openai".into()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn unknown_named_tool_fails_before_sending() {
        let adapter = adapter(false);
        let err = adapter
            .chat_with_tool_choice(&CallContext::new(), &[Message::user("hi")], &ToolChoice::Named("zzz".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
