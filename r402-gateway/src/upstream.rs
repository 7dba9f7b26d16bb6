//! Upstream Connector (§4.8): a pool of streamable-HTTP MCP client sessions
//! keyed by `server_id`.
//!
//! Each [`UpstreamSession`] wraps a pooled [`reqwest::Client`] (connection
//! reuse and HTTP/2 multiplexing come from the client's own keep-alive pool,
//! the same way this ecosystem's own [`reqwest-middleware`](reqwest_middleware)
//! client layer is built) plus a [`tokio::sync::Semaphore`] bounding
//! per-server concurrency (§5 backpressure). The `initialize` handshake is
//! performed once per session and memoized; a transport error during it
//! triggers exactly one reconnect-and-retry. Tool-call transport errors are
//! never retried, preserving payment semantics (§4.8) — a retried call could
//! duplicate a side effect the upstream already started.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};

use crate::error::{AsGatewayProblem, ErrorCategory};
use crate::jsonrpc::RpcRequest;

/// Errors raised while talking to an upstream MCP server.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum UpstreamError {
    /// The upstream's `mcp_origin` could not be parsed as a URL.
    #[error("invalid upstream origin: {0}")]
    InvalidOrigin(#[from] url::ParseError),
    /// The HTTP request itself failed (connect, TLS, timeout, stream reset).
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The upstream returned a body that did not decode as JSON-RPC.
    #[error("upstream returned an undecodable response")]
    Undecodable,
    /// The `initialize` handshake failed twice in a row.
    #[error("upstream session could not be initialized: {0}")]
    InitializeFailed(String),
    /// The per-server in-flight call limit was reached (§5 backpressure).
    #[error("upstream server is at capacity")]
    Busy,
    /// The call did not complete within the requirement's `max_timeout_seconds` (§5).
    #[error("upstream call timed out")]
    Timeout,
}

impl AsGatewayProblem for UpstreamError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Busy => ErrorCategory::ClientFault,
            _ => ErrorCategory::Upstream,
        }
    }

    fn error_reason(&self) -> &'static str {
        match self {
            Self::InvalidOrigin(_) => "invalid_upstream_origin",
            Self::Transport(_) => "upstream_unavailable",
            Self::Undecodable => "upstream_undecodable_response",
            Self::InitializeFailed(_) => "upstream_initialize_failed",
            Self::Busy => "busy",
            Self::Timeout => "upstream_timeout",
        }
    }
}

/// Default per-call timeout when the caller has no requirement to draw
/// `max_timeout_seconds` from (§5: 60s).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// One JSON-RPC response or server-initiated notification fragment (§4.8,
/// §5: "fragments of the same `id` are delivered in the order received").
#[derive(Debug, Clone)]
pub struct JsonRpcFragment(pub Value);

/// A long-lived connection to one upstream's `/mcp` endpoint.
struct UpstreamSession {
    http: Client,
    endpoint: url::Url,
    auth_headers: HeaderMap,
    concurrency: Arc<Semaphore>,
    initialized: Mutex<bool>,
    last_used: Mutex<Instant>,
}

impl UpstreamSession {
    fn new(origin: &str, auth_headers: HeaderMap, concurrency: usize) -> Result<Self, UpstreamError> {
        let base = url::Url::parse(origin)?;
        let endpoint = base.join("mcp").unwrap_or(base);
        Ok(Self {
            http: Client::new(),
            endpoint,
            auth_headers,
            concurrency: Arc::new(Semaphore::new(concurrency)),
            initialized: Mutex::new(false),
            last_used: Mutex::new(Instant::now()),
        })
    }

    async fn touch(&self) {
        *self.last_used.lock().await = Instant::now();
    }

    async fn idle_for(&self) -> Duration {
        self.last_used.lock().await.elapsed()
    }

    /// Performs the `initialize` handshake if it has not already succeeded
    /// on this session, retrying exactly once on transport failure.
    async fn ensure_initialized(&self) -> Result<(), UpstreamError> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        let request = RpcRequest {
            jsonrpc: "2.0".to_owned(),
            id: Some(crate::jsonrpc::RequestId::Number(0)),
            method: "initialize".to_owned(),
            params: Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "r402-gateway", "version": env!("CARGO_PKG_VERSION")},
            })),
        };

        let mut attempt = self.post(&request).await;
        if attempt.is_err() {
            attempt = self.post(&request).await;
        }
        attempt.map_err(|e| UpstreamError::InitializeFailed(e.to_string()))?;

        *initialized = true;
        Ok(())
    }

    /// Issues one JSON-RPC request and returns the raw response body as a
    /// single fragment, or the concatenation of an SSE stream's `data:`
    /// lines if the upstream responds with `text/event-stream`.
    async fn post(&self, request: &RpcRequest) -> Result<Vec<JsonRpcFragment>, UpstreamError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(self.auth_headers.clone())
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .json(request)
            .send()
            .await?
            .error_for_status()?;

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            read_sse_fragments(response).await
        } else {
            let bytes = response.bytes().await?;
            let value: Value = serde_json::from_slice(&bytes).map_err(|_| UpstreamError::Undecodable)?;
            Ok(vec![JsonRpcFragment(value)])
        }
    }
}

/// Reads an SSE body to completion, parsing each `data: ...` line as one
/// JSON-RPC fragment. The gateway does not keep the stream open past the
/// final `message` event — a single `tools/call` maps to a single logical
/// response, streamed in chunks but not indefinitely long-lived.
async fn read_sse_fragments(response: reqwest::Response) -> Result<Vec<JsonRpcFragment>, UpstreamError> {
    let mut stream = response.bytes_stream();
    let mut buf = String::new();
    let mut fragments = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = buf.find('\n') {
            let line = buf[..pos].trim_end_matches('\r').to_owned();
            buf.drain(..=pos);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(data).map_err(|_| UpstreamError::Undecodable)?;
                fragments.push(JsonRpcFragment(value));
            }
        }
    }

    if fragments.is_empty() {
        return Err(UpstreamError::Undecodable);
    }
    Ok(fragments)
}

/// Pool of streamable-HTTP MCP sessions keyed by `server_id` (§4.8).
#[derive(Clone)]
pub struct UpstreamConnector {
    sessions: Arc<DashMap<String, Arc<UpstreamSession>>>,
    default_concurrency: usize,
    idle_timeout: Duration,
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("pooled_servers", &self.sessions.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl UpstreamConnector {
    /// Builds a connector with the §5 defaults: 32 in-flight calls per
    /// server, 300s idle eviction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            default_concurrency: 32,
            idle_timeout: Duration::from_secs(300),
        }
    }

    /// Overrides the per-server concurrency cap.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = concurrency;
        self
    }

    /// Overrides the idle-session eviction timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Evicts sessions idle for longer than the configured timeout. Intended
    /// to be called periodically from a background task alongside the
    /// Payment Store janitor.
    pub async fn evict_idle_async(&self) {
        let mut stale = Vec::new();
        for entry in self.sessions.iter() {
            if entry.value().idle_for().await >= self.idle_timeout {
                stale.push(entry.key().clone());
            }
        }
        for server_id in stale {
            self.sessions.remove(&server_id);
        }
    }

    /// Drops the pooled session for `server_id`, forcing the next call to
    /// re-establish it (used when a server's registration changes, §4.8).
    pub fn evict(&self, server_id: &str) {
        self.sessions.remove(server_id);
    }

    fn get_or_create(
        &self,
        server_id: &str,
        mcp_origin: &str,
        auth_headers: &HeaderMap,
    ) -> Result<Arc<UpstreamSession>, UpstreamError> {
        if let Some(existing) = self.sessions.get(server_id) {
            return Ok(Arc::clone(&existing));
        }
        let session = Arc::new(UpstreamSession::new(
            mcp_origin,
            auth_headers.clone(),
            self.default_concurrency,
        )?);
        self.sessions.insert(server_id.to_owned(), Arc::clone(&session));
        Ok(session)
    }

    /// Calls `server_id`'s upstream with `request`, establishing and
    /// initializing a session on first use or after a prior transport
    /// error. Tool-call transport errors are surfaced directly, never
    /// retried (§4.8). Bounded by `timeout` (§5: the requirement's
    /// `max_timeout_seconds`, or [`DEFAULT_CALL_TIMEOUT`] for calls with no
    /// requirement to draw it from), enforced with `tokio::time::timeout`
    /// rather than a spin-wait so a hung upstream releases its concurrency
    /// permit instead of blocking it indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError::Busy`] if the per-server concurrency cap is
    /// exhausted, [`UpstreamError::Timeout`] if `timeout` elapses first, or
    /// any other [`UpstreamError`] variant on transport or handshake failure.
    #[tracing::instrument(skip(self, auth_headers, request))]
    pub async fn call(
        &self,
        server_id: &str,
        mcp_origin: &str,
        auth_headers: &HeaderMap,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Vec<JsonRpcFragment>, UpstreamError> {
        let session = self.get_or_create(server_id, mcp_origin, auth_headers)?;
        session.ensure_initialized().await?;

        let permit = session
            .concurrency
            .clone()
            .try_acquire_owned()
            .map_err(|_| UpstreamError::Busy)?;

        session.touch().await;
        let result = match tokio::time::timeout(timeout, session.post(request)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout),
        };
        drop(permit);

        if result.is_err() {
            // A transport error or timeout invalidates the session so the
            // next call re-initializes it; this particular call is not retried.
            self.sessions.remove(server_id);
        }
        result
    }
}

impl Default for UpstreamConnector {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the auth-headers [`HeaderMap`] a `require_auth` server expects,
/// from the opaque `auth_headers` JSON object stored on its registration (§3).
///
/// # Errors
///
/// Returns [`UpstreamError::InvalidOrigin`]-free but silently skips any
/// entry whose key or value is not a valid HTTP header component.
#[must_use]
pub fn build_auth_headers(auth_headers: &Value) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(map) = auth_headers.as_object() {
        for (key, value) in map {
            let Some(value) = value.as_str() else { continue };
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                continue;
            };
            headers.insert(name, value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_auth_headers_skips_non_string_values() {
        let headers = build_auth_headers(&serde_json::json!({
            "Authorization": "Bearer abc",
            "X-Count": 5,
        }));
        assert_eq!(headers.get("authorization").unwrap(), "Bearer abc");
        assert!(headers.get("x-count").is_none());
    }

    #[test]
    fn busy_maps_to_client_fault() {
        assert_eq!(UpstreamError::Busy.category(), ErrorCategory::ClientFault);
    }

    #[test]
    fn transport_error_maps_to_upstream_category() {
        let err = UpstreamError::Undecodable;
        assert_eq!(err.category(), ErrorCategory::Upstream);
    }

    #[test]
    fn timeout_maps_to_upstream_category() {
        assert_eq!(UpstreamError::Timeout.category(), ErrorCategory::Upstream);
        assert_eq!(UpstreamError::Timeout.error_reason(), "upstream_timeout");
    }
}
