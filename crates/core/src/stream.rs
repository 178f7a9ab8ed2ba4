//! Streaming merge.
//!
//! Adapters decode their wire format into a pull-based stream of
//! [`StreamEvent`]s. [`merge_stream`] folds that stream into the one
//! [`Message`] the turn produces. Single-shot responses are expressed as the
//! same events, so both paths yield identical messages.
//!
//! Turn states: `Sent → Streaming → Decoded → {TextTurn | ToolCallTurn}`.
//! Consumption stops as soon as the first proposed tool call is complete;
//! later proposals in the same turn are discarded.

use std::pin::pin;

use futures::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::message::{AssistantMessage, Message, ToolCallMessage, Usage};

/// One decoded increment of a backend response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ThinkingDelta(String),
    /// A piece of a tool call. `index` distinguishes concurrent proposals;
    /// `id` and `name` usually arrive only on the first fragment.
    ToolCallFragment {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    /// The backend closed the tool call at `index`.
    ToolCallEnd { index: u32 },
    Usage(Usage),
    Done,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    index: u32,
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Complete,
}

/// Accumulates events for a single turn.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    content: String,
    thinking: String,
    tool_call: Option<PendingToolCall>,
    discarded_calls: u32,
    usage: Option<Usage>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns `true` once the turn is decided and no
    /// further events should be read.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        self.step(event) == Flow::Complete
    }

    fn step(&mut self, event: StreamEvent) -> Flow {
        match event {
            StreamEvent::TextDelta(text) => self.content.push_str(&text),
            StreamEvent::ThinkingDelta(text) => self.thinking.push_str(&text),
            StreamEvent::ToolCallFragment {
                index,
                id,
                name,
                arguments,
            } => match &mut self.tool_call {
                None => {
                    self.tool_call = Some(PendingToolCall {
                        index,
                        id,
                        name: name.unwrap_or_default(),
                        arguments,
                    });
                }
                Some(call) if call.index == index => {
                    if id.is_some() {
                        call.id = id;
                    }
                    if let Some(name) = name
                        && call.name.is_empty()
                    {
                        call.name = name;
                    }
                    call.arguments.push_str(&arguments);
                }
                Some(_) => {
                    // A second proposal started, so the first one is whole.
                    self.discarded_calls += 1;
                    return Flow::Complete;
                }
            },
            StreamEvent::ToolCallEnd { index } => {
                if self.tool_call.as_ref().is_some_and(|c| c.index == index) {
                    return Flow::Complete;
                }
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(match self.usage {
                    Some(earlier) => earlier.merge(usage),
                    None => usage,
                });
            }
            StreamEvent::Done => return Flow::Complete,
        }
        Flow::Continue
    }

    /// Decode the accumulated events into the turn's message.
    pub fn finish(self, provider: &str) -> Result<Message, ProviderError> {
        if let Some(call) = self.tool_call {
            if self.discarded_calls > 0 {
                debug!(
                    provider,
                    tool = %call.name,
                    discarded = self.discarded_calls,
                    "Dropping extra tool call proposals for this turn"
                );
            }
            if call.name.is_empty() {
                return Err(ProviderError::MalformedToolCall {
                    tool_name: String::new(),
                    reason: "tool call has no name".into(),
                });
            }
            let arguments = parse_arguments(&call.name, &call.arguments)?;
            return Ok(Message::ToolCall(ToolCallMessage {
                call_id: call.id.filter(|id| !id.is_empty()),
                tool_name: call.name,
                arguments,
                timestamp: chrono::Utc::now(),
                usage: self.usage,
            }));
        }

        if self.content.is_empty() {
            return Err(ProviderError::EmptyResponse {
                provider: provider.to_string(),
            });
        }

        Ok(Message::Assistant(AssistantMessage {
            content: self.content,
            thinking: (!self.thinking.is_empty()).then_some(self.thinking),
            usage: self.usage,
        }))
    }
}

/// Parse accumulated argument text into a JSON object.
///
/// Empty text means "no arguments". Anything that is not a JSON object is a
/// protocol error from the backend.
pub fn parse_arguments(
    tool_name: &str,
    raw: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Map::new());
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProviderError::MalformedToolCall {
            tool_name: tool_name.to_string(),
            reason: format!("arguments must be a JSON object, got {other}"),
        }),
        Err(e) => Err(ProviderError::MalformedToolCall {
            tool_name: tool_name.to_string(),
            reason: format!("arguments are not valid JSON: {e}"),
        }),
    }
}

/// Merge a stream of events into one message, honouring cancellation.
///
/// On cancellation the stream is dropped and `ProviderError::Cancelled`
/// returned; a partial message is never produced. A stream that ends before
/// the turn is decided (no `Done`, no closed tool call) was cut off and is
/// reported as `ProviderError::StreamInterrupted`.
pub async fn merge_stream<S>(
    ctx: &CallContext,
    provider: &str,
    events: S,
) -> Result<Message, ProviderError>
where
    S: Stream<Item = Result<StreamEvent, ProviderError>>,
{
    let mut events = pin!(events);
    let mut turn = TurnAccumulator::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ProviderError::Cancelled),
            next = events.next() => next,
        };
        match next {
            None => {
                debug!(provider, "Stream ended before a terminal event");
                return Err(ProviderError::StreamInterrupted(
                    "stream ended before completion".into(),
                ));
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(event)) => {
                trace!(provider, ?event, "Stream event");
                if turn.apply(event) {
                    break;
                }
            }
        }
    }

    turn.finish(provider)
}

/// Merge an already-complete list of events (single-shot responses).
pub async fn merge_events(
    ctx: &CallContext,
    provider: &str,
    events: Vec<StreamEvent>,
) -> Result<Message, ProviderError> {
    merge_stream(ctx, provider, futures::stream::iter(events.into_iter().map(Ok))).await
}
