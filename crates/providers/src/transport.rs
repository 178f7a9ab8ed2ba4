//! HTTP plumbing shared by the adapters: client construction, status
//! mapping, and incremental line decoding for SSE and NDJSON bodies.

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use convoke_core::context::CallContext;
use convoke_core::error::ProviderError;
use futures::{Stream, StreamExt};
use tracing::warn;

/// Used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("failed to create HTTP client: {e}")))
}

pub(crate) fn network_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Send a request under the call context and map error statuses.
pub(crate) async fn send(
    ctx: &CallContext,
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let response = ctx
        .guard(async { request.send().await.map_err(network_error) })
        .await?;

    let status = response.status().as_u16();
    match status {
        200..=299 => Ok(response),
        429 => {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            Err(ProviderError::RateLimited { retry_after_secs })
        }
        401 | 403 => Err(ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the API key (status {status})"
        ))),
        _ => {
            let error_body = ctx
                .guard(async { Ok::<_, ProviderError>(response.text().await.unwrap_or_default()) })
                .await?;
            warn!(provider, status, body = %error_body, "Provider returned error");
            Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            })
        }
    }
}

/// Read a whole JSON body under the call context.
pub(crate) async fn json_body(
    ctx: &CallContext,
    provider: &str,
    response: reqwest::Response,
) -> Result<serde_json::Value, ProviderError> {
    let body = ctx
        .guard(async { response.bytes().await.map_err(network_error) })
        .await?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::ApiError {
        status_code: 200,
        message: format!("Failed to parse {provider} response: {e}"),
    })
}

struct LineState<S> {
    bytes: S,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

/// Split a byte stream into lines (without terminators).
///
/// Bytes are buffered until a newline arrives, so multi-byte characters split
/// across chunks decode correctly. A trailing line without a newline is
/// emitted when the stream ends.
pub(crate) fn lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = LineState {
        bytes,
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = state.buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
                        state.ready.push_back(line.trim_end_matches('\r').to_string());
                    }
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ProviderError::StreamInterrupted(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    if !state.buffer.is_empty() {
                        let rest = std::mem::take(&mut state.buffer);
                        let line = String::from_utf8_lossy(&rest);
                        state.ready.push_back(line.trim_end_matches('\r').to_string());
                    }
                }
            }
        }
    })
}

/// Payload OpenAI-style servers send after the last chunk.
pub(crate) const DONE_MARKER: &str = "[DONE]";

/// One server-sent event: the `event:` name (if any) and its joined data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

struct SseState<L> {
    lines: L,
    event: Option<String>,
    data: Vec<String>,
    finished: bool,
}

/// Group lines into server-sent events. Comments are skipped. A `[DONE]`
/// payload is yielded as the final event so decoders can tell a finished
/// stream from one that was cut off.
pub(crate) fn sse_events<L>(lines: L) -> impl Stream<Item = Result<SseEvent, ProviderError>>
where
    L: Stream<Item = Result<String, ProviderError>> + Unpin,
{
    let state = SseState {
        lines,
        event: None,
        data: Vec::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            let line = match state.lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    return take_event(&mut state).map(|ev| (Ok(ev), state));
                }
            };

            if line.is_empty() {
                if let Some(ev) = take_event(&mut state) {
                    if ev.data == DONE_MARKER {
                        state.finished = true;
                    }
                    return Some((Ok(ev), state));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => state.event = Some(value.to_string()),
                "data" => {
                    if value == DONE_MARKER && state.data.is_empty() {
                        state.finished = true;
                        return Some((
                            Ok(SseEvent {
                                event: state.event.take(),
                                data: DONE_MARKER.into(),
                            }),
                            state,
                        ));
                    }
                    state.data.push(value.to_string());
                }
                _ => {}
            }
        }
    })
}

fn take_event<L>(state: &mut SseState<L>) -> Option<SseEvent> {
    if state.data.is_empty() {
        state.event = None;
        return None;
    }
    Some(SseEvent {
        event: state.event.take(),
        data: std::mem::take(&mut state.data).join("\n"),
    })
}
