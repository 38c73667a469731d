//! The transport-only provider trait. A `ProviderClient` never sees a
//! canonical request — it sends the already-translated wire body a
//! `FormatAdapter` produced and hands back raw provider JSON or a raw byte
//! stream. Message translation and cost math live elsewhere; this layer
//! only moves bytes and attaches credentials.

use async_trait::async_trait;
use bytes::Bytes;
use relaygate_core::schema::ClientFormat;
use relaygate_core::GatewayError;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport-level failure. The router/pipeline map this onto
/// `GatewayError::ProviderError`/`GatewayTimeout`.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("stream broken: {0}")]
    StreamBroken(String),
}

impl ProviderError {
    /// Status codes the router's retry loop treats as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 529)
            }
            ProviderError::Timeout | ProviderError::Connection(_) => true,
            ProviderError::StreamBroken(_) => false,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ProviderError::Http { status, .. } => *status,
            ProviderError::Timeout => 504,
            ProviderError::Connection(_) => 502,
            ProviderError::StreamBroken(_) => 502,
        }
    }
}

/// Upstream 4xx/5xx forward their status and raw body to the client; the
/// other transport failures collapse onto the gateway's own taxonomy.
impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Http { status, body } => GatewayError::ProviderError { status, body },
            ProviderError::Timeout => GatewayError::GatewayTimeout,
            ProviderError::Connection(msg) => GatewayError::ProviderError { status: 502, body: msg },
            ProviderError::StreamBroken(msg) => GatewayError::StreamBroken(msg),
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// One upstream LLM vendor's HTTP transport. `body` is already in the wire
/// format named by `wire` — built either by a
/// `relaygate_adapters::FormatAdapter::canonical_to_provider` pass (adapter
/// path) or copied from the client verbatim (passthrough path). `wire`
/// selects the provider endpoint: OpenAI-compatible vendors expose
/// `/chat/completions`, `/responses`, and (xAI) `/messages` side by side.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Lowercase identifier used in `"<provider>/<model>"` routing and in
    /// `select_path`, e.g. `"anthropic"`, `"openai"`, `"xai"`.
    fn name(&self) -> &str;

    /// Models this client is configured to accept without an explicit
    /// provider prefix.
    fn models(&self) -> Vec<String>;

    async fn send(&self, body: Value, wire: ClientFormat) -> ProviderResult<Value>;

    /// Returns a channel of raw provider SSE events, already parsed to
    /// JSON (OpenAI's literal `[DONE]` sentinel is delivered as
    /// `Value::String("[DONE]")`, never dropped silently). Used by the
    /// adapter path, which re-renders events in the client's format.
    async fn stream(
        &self,
        body: Value,
        wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Value>>>;

    /// Returns the undecoded upstream byte stream, one channel item per
    /// chunk as received off the socket. Used by the passthrough path,
    /// which forwards these bytes to the client without reframing. The
    /// channel is bounded at one chunk so a stalled client socket pauses
    /// the upstream read instead of queueing.
    async fn stream_bytes(
        &self,
        body: Value,
        wire: ClientFormat,
    ) -> ProviderResult<mpsc::Receiver<ProviderResult<Bytes>>>;

    async fn health_check(&self) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_forwards_status_and_body_to_gateway_error() {
        let err = ProviderError::Http { status: 429, body: "{\"error\":\"slow down\"}".into() };
        match GatewayError::from(err) {
            GatewayError::ProviderError { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("slow down"));
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        assert!(matches!(GatewayError::from(ProviderError::Timeout), GatewayError::GatewayTimeout));
    }
}
