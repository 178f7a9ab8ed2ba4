//! Backend adapters for convoke.
//!
//! One canonical adapter per backend, all implementing
//! `convoke_core::ChatAdapter`. [`build_adapter`] picks the configured one.

pub mod anthropic;
pub mod factory;
pub mod ollama;
pub mod openai_compat;
mod transport;

pub use anthropic::AnthropicAdapter;
pub use factory::{adapter_options, build_adapter};
pub use ollama::OllamaAdapter;
pub use openai_compat::OpenAiCompatAdapter;
