//! Per-call context: cancellation plus the identity of the call being served.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// The cancellable context handed to every adapter call and tool handler.
///
/// Cloning is cheap; clones share the same cancellation token. Use
/// [`CallContext::child`] to derive a context that can be cancelled on its
/// own without affecting the parent.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    call_id: Option<String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token (e.g. one tied to Ctrl-C).
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            call_id: None,
        }
    }

    /// Derive a context for a specific tool call.
    pub fn for_call(&self, call_id: Option<String>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            call_id,
        }
    }

    /// A child context: cancelled when the parent is, but cancellable alone.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            call_id: self.call_id.clone(),
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `fut` unless the context is cancelled first.
    ///
    /// Cancellation wins ties and surfaces as [`ProviderError::Cancelled`];
    /// the in-flight future is dropped.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if self.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
            out = fut => out,
        }
    }
}
