//! Adapter factory: builds the one configured adapter from `AppConfig`.

use std::time::Duration;

use convoke_config::AppConfig;
use convoke_core::error::ProviderError;
use convoke_core::provider::{AdapterOptions, ChatAdapter};
use tracing::info;

use crate::anthropic::AnthropicAdapter;
use crate::ollama::OllamaAdapter;
use crate::openai_compat::OpenAiCompatAdapter;

/// Adapter settings derived from configuration.
pub fn adapter_options(config: &AppConfig) -> AdapterOptions {
    AdapterOptions {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        stream: config.stream,
        thinking_budget: Some(config.thinking_budget),
    }
}

/// Build the adapter for `config.provider`.
///
/// `anthropic` and `ollama` get their native adapters; every other name is
/// treated as an OpenAI-compatible endpoint, which needs either a well-known
/// base URL or `[providers.<name>].api_url`.
pub fn build_adapter(config: &AppConfig) -> Result<Box<dyn ChatAdapter>, ProviderError> {
    let name = config.provider.as_str();
    let options = adapter_options(config);
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let api_key = config.api_key_for(name).map(String::from);
    let api_url = config.api_url_for(name);

    let adapter: Box<dyn ChatAdapter> = match name {
        "anthropic" => {
            let key = api_key.ok_or_else(|| missing_key(name))?;
            let mut adapter = AnthropicAdapter::new(key, options, timeout)?;
            if let Some(url) = api_url {
                adapter = adapter.with_base_url(url);
            }
            Box::new(adapter)
        }
        "ollama" => Box::new(OllamaAdapter::new(api_url, options, timeout)?),
        _ => {
            let base_url = api_url
                .map(String::from)
                .or_else(|| default_base_url(name).map(String::from))
                .ok_or_else(|| {
                    ProviderError::NotConfigured(format!(
                        "unknown provider '{name}': set [providers.{name}].api_url"
                    ))
                })?;
            if requires_key(name) && api_key.is_none() {
                return Err(missing_key(name));
            }
            Box::new(OpenAiCompatAdapter::new(name, base_url, api_key, options, timeout)?)
        }
    };

    info!(provider = name, model = %config.model, stream = config.stream, "Adapter ready");
    Ok(adapter)
}

fn missing_key(name: &str) -> ProviderError {
    ProviderError::NotConfigured(format!(
        "no API key for '{name}': set api_key in config or the provider's environment variable"
    ))
}

fn requires_key(name: &str) -> bool {
    matches!(name, "openai" | "openrouter" | "deepseek" | "groq" | "together" | "fireworks")
}

/// The base URL for well-known OpenAI-compatible providers.
fn default_base_url(name: &str) -> Option<&'static str> {
    match name {
        "openai" => Some(crate::openai_compat::OPENAI_URL),
        "openrouter" => Some(crate::openai_compat::OPENROUTER_URL),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        "llamacpp" | "llama.cpp" => Some("http://localhost:8080/v1"),
        _ => None,
    }
}
