use serde_json::json;
use thiserror::Error;

use crate::schema::ClientFormat;

/// Unified error type for the gateway's request pipeline.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ── Input validation ───────────────────────────────────────
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Authn/authz ────────────────────────────────────────────
    #[error("missing credential for provider {0}")]
    Unauthorized(String),

    // ── Routing ────────────────────────────────────────────────
    #[error("no providers configured")]
    NoProvidersConfigured,

    #[error("model not supported: {0}")]
    ModelNotSupported(String),

    // ── Upstream ───────────────────────────────────────────────
    #[error("provider error: {status}: {body}")]
    ProviderError { status: u16, body: String },

    #[error("gateway timeout waiting on upstream")]
    GatewayTimeout,

    // ── Translation ────────────────────────────────────────────
    #[error("adapter failure: {0}")]
    AdapterFailure(String),

    #[error("stream broken: {0}")]
    StreamBroken(String),

    // ── Storage ────────────────────────────────────────────────
    #[error("storage error: {0}")]
    StorageError(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// The HTTP status this error surfaces as, per the error taxonomy.
    /// `ProviderError` forwards the upstream status instead of a fixed code.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidInput(_) => 400,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::NoProvidersConfigured => 503,
            GatewayError::ModelNotSupported(_) => 400,
            GatewayError::ProviderError { status, .. } => *status,
            GatewayError::GatewayTimeout => 504,
            GatewayError::AdapterFailure(_) => 500,
            GatewayError::StreamBroken(_) => 500,
            GatewayError::StorageError(_) => 500,
            GatewayError::Io(_) | GatewayError::Serialization(_) | GatewayError::Other(_) => 500,
        }
    }

    /// Error `type`/`code` tag used in the JSON error body, independent of
    /// client format.
    fn kind_tag(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "invalid_request_error",
            GatewayError::Unauthorized(_) => "authentication_error",
            GatewayError::NoProvidersConfigured => "no_providers_configured",
            GatewayError::ModelNotSupported(_) => "model_not_supported",
            GatewayError::ProviderError { .. } => "provider_error",
            GatewayError::GatewayTimeout => "gateway_timeout",
            GatewayError::AdapterFailure(_) => "adapter_failure",
            GatewayError::StreamBroken(_) => "stream_broken",
            GatewayError::StorageError(_) => "storage_error",
            GatewayError::Io(_) | GatewayError::Serialization(_) | GatewayError::Other(_) => {
                "internal_error"
            }
        }
    }

    /// Render the structured JSON error body in the caller's declared wire
    /// format. Only meaningful before response headers are sent — once a
    /// stream is open the caller must close the socket instead. An upstream
    /// provider error whose body is already JSON is forwarded verbatim,
    /// since the upstream's own error shape is what the client asked for.
    pub fn to_client_body(&self, format: ClientFormat) -> serde_json::Value {
        if let GatewayError::ProviderError { body, .. } = self {
            if let Ok(upstream) = serde_json::from_str::<serde_json::Value>(body) {
                if upstream.is_object() {
                    return upstream;
                }
            }
        }
        let message = self.to_string();
        match format {
            ClientFormat::AnthropicMessages => json!({
                "type": "error",
                "error": {
                    "type": self.kind_tag(),
                    "message": message,
                }
            }),
            ClientFormat::OpenAiChat | ClientFormat::OpenAiResponses => json!({
                "error": {
                    "message": message,
                    "code": self.kind_tag(),
                    "type": self.kind_tag(),
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_forwards_upstream_status() {
        let err = GatewayError::ProviderError {
            status: 429,
            body: "rate limited".into(),
        };
        assert_eq!(err.status_code(), 429);
    }

    #[test]
    fn no_providers_configured_is_503() {
        assert_eq!(GatewayError::NoProvidersConfigured.status_code(), 503);
    }

    #[test]
    fn openai_error_body_shape() {
        let err = GatewayError::ModelNotSupported("grok-9".into());
        let body = err.to_client_body(ClientFormat::OpenAiChat);
        assert!(body["error"]["message"].as_str().unwrap().contains("grok-9"));
        assert_eq!(body["error"]["type"], "model_not_supported");
    }

    #[test]
    fn anthropic_error_body_shape() {
        let err = GatewayError::InvalidInput("bad timezone".into());
        let body = err.to_client_body(ClientFormat::AnthropicMessages);
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
}
