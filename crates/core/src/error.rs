//! Error types for the convoke tool-calling layer.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Only *hard* failures live here. Problems the model can fix by itself
//! (bad arguments, a denied path, a stale read) travel as
//! [`ToolResult::error`](crate::tool::ToolResult) data instead.

use thiserror::Error;

/// The top-level error type for all convoke operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Hard failures raised by a backend adapter.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Empty response from {provider}: no text and no tool call")]
    EmptyResponse { provider: String },

    #[error("Malformed tool call '{tool_name}': {reason}")]
    MalformedToolCall { tool_name: String, reason: String },
}

impl ProviderError {
    /// Whether this error is the caller's own cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Hard failures raised while registering or dispatching tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Registration is not supported on {registry}: tools belong to their source registry")]
    RegistrationUnsupported { registry: String },

    #[error("Invalid tool name '{0}': names must be non-empty")]
    InvalidName(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("I/O failure in {tool_name}: {source}")]
    Io {
        tool_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn empty_response_is_distinct_from_cancellation() {
        let empty = ProviderError::EmptyResponse {
            provider: "openai".into(),
        };
        assert!(!empty.is_cancelled());
        assert!(ProviderError::Cancelled.is_cancelled());
        assert!(empty.to_string().contains("openai"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::RegistrationUnsupported {
            registry: "composite".into(),
        });
        assert!(err.to_string().contains("composite"));
        assert!(err.to_string().contains("source registry"));
    }
}
