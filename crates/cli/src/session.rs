//! A minimal external turn loop.
//!
//! The session owns the history. Each step asks the adapter for one message;
//! a tool call is dispatched through the registry and its result appended
//! with the same call ID, then the adapter is asked again. The loop ends at
//! the first text answer or after `max_steps` adapter calls.

use std::sync::Arc;

use convoke_core::context::CallContext;
use convoke_core::error::{Error, ToolError};
use convoke_core::message::{AssistantMessage, Message};
use convoke_core::provider::ChatAdapter;
use convoke_core::registry::Registry;
use convoke_core::tool::ToolResult;
use tracing::{debug, info};

pub const DEFAULT_MAX_STEPS: usize = 8;

/// How a call to [`Session::send`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Answer(AssistantMessage),
    /// The step budget ran out while the model was still calling tools.
    StepLimit { steps: usize },
}

pub struct Session {
    adapter: Box<dyn ChatAdapter>,
    registry: Arc<dyn Registry>,
    history: Vec<Message>,
    max_steps: usize,
    enable_thinking: bool,
}

impl Session {
    /// Attach `registry` to `adapter` and start an empty history.
    pub fn new(mut adapter: Box<dyn ChatAdapter>, registry: Arc<dyn Registry>) -> Self {
        adapter.set_registry(Arc::clone(&registry));
        Self {
            adapter,
            registry,
            history: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
            enable_thinking: false,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_thinking(mut self, enable: bool) -> Self {
        self.enable_thinking = enable;
        self
    }

    pub fn with_system(mut self, prompt: impl Into<String>) -> Self {
        self.history.push(Message::system(prompt));
        self
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    /// Append a user message and run steps until a text answer.
    pub async fn send(&mut self, ctx: &CallContext, input: impl Into<String>) -> Result<Outcome, Error> {
        self.history.push(Message::user(input));

        for step in 1..=self.max_steps {
            debug!(step, history = self.history.len(), "Requesting turn");
            match self.adapter.chat(ctx, &self.history, self.enable_thinking).await? {
                Message::Assistant(answer) => {
                    self.history.push(Message::Assistant(answer.clone()));
                    return Ok(Outcome::Answer(answer));
                }
                Message::ToolCall(call) => {
                    info!(tool = %call.tool_name, call_id = ?call.call_id, step, "Tool call");
                    let call_id = call.call_id.clone();
                    let name = call.tool_name.clone();
                    let arguments = call.arguments.clone();
                    self.history.push(Message::ToolCall(call));

                    let call_ctx = ctx.for_call(call_id.clone());
                    match self.registry.dispatch(&call_ctx, &name, &arguments).await {
                        Ok(result) => {
                            debug!(tool = %name, error = result.is_error(), "Tool finished");
                            self.history.push(Message::tool_result(call_id, result));
                        }
                        Err(e) => {
                            // Keep the call paired so the history stays replayable.
                            let note = match &e {
                                ToolError::Cancelled(_) => "cancelled".to_string(),
                                other => other.to_string(),
                            };
                            self.history.push(Message::tool_result(call_id, ToolResult::error(note)));
                            return Err(e.into());
                        }
                    }
                }
                other => {
                    return Err(Error::Internal(format!(
                        "adapter returned a {} message",
                        role_name(&other)
                    )));
                }
            }
        }

        Ok(Outcome::StepLimit {
            steps: self.max_steps,
        })
    }
}

fn role_name(message: &Message) -> &'static str {
    match message {
        Message::User(_) => "user",
        Message::Assistant(_) => "assistant",
        Message::System(_) => "system",
        Message::ToolCall(_) => "tool_call",
        Message::ToolResult(_) => "tool_result",
    }
}
