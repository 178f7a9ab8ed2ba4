//! # convoke core
//!
//! Domain types, traits, and error definitions for the convoke tool-calling
//! layer. Backend adapters and capability implementations both depend on
//! this crate and never on each other.
//!
//! ## Design Philosophy
//!
//! The two seams are defined as traits here:
//! - [`ChatAdapter`]: one canonical adapter per LLM backend
//! - [`Registry`]: name → tool lookup and dispatch
//!
//! Tool failures the model can correct are plain data ([`ToolResult::error`]);
//! only protocol and programming failures are Rust errors.

pub mod choice;
pub mod context;
pub mod error;
pub mod message;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod tool;
pub mod value;

// Re-export key types at crate root for ergonomics
pub use choice::{ToolChoice, ToolPlan};
pub use context::CallContext;
pub use error::{Error, ProviderError, Result, ToolError};
pub use message::{
    AssistantMessage, ImageData, Message, SystemMessage, ToolCallMessage, ToolResultMessage, Usage,
    UserMessage, thread_call_ids,
};
pub use provider::{AdapterOptions, ChatAdapter, ToolDefinition};
pub use registry::{CompositeRegistry, RawArguments, Registry, ToolRegistry};
pub use stream::{StreamEvent, TurnAccumulator, merge_events, merge_stream, parse_arguments};
pub use tool::{ArgumentType, Tool, ToolArgument, ToolHandler, ToolResult, handler_fn};
pub use value::{ArgError, ArgValue, ToolArgs};
