use relaygate_core::{CanonicalRequest, CanonicalResponse, CanonicalStreamEvent, GatewayError};
use serde_json::Value;
use thiserror::Error;

/// Translation-layer error. Callers convert this to a `GatewayError` at the
/// pipeline boundary — `InvalidInput` for malformed client shapes (400),
/// `Translation` for anything that should surface as `AdapterFailure` (500).
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("translation error: {0}")]
    Translation(String),
}

impl From<AdapterError> for GatewayError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::InvalidInput(msg) => GatewayError::InvalidInput(msg),
            AdapterError::Translation(msg) => GatewayError::AdapterFailure(msg),
        }
    }
}

pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// A stateful, per-request folder that consumes one provider's streaming
/// events and yields canonical events. Implementations hold accumulation
/// state (current output item id, partial tool-call argument buffer,
/// partial refusal string, open content-part index) across calls — a fresh
/// instance is constructed for every request, never reused or shared.
pub trait StreamProcessor: Send {
    /// Fold one raw provider stream event into zero or more canonical
    /// events — providers batch or split differently, so the cardinality
    /// is not 1:1.
    fn process(&mut self, provider_event: &Value) -> AdapterResult<Vec<CanonicalStreamEvent>>;
}

impl<P: StreamProcessor + ?Sized> StreamProcessor for Box<P> {
    fn process(&mut self, provider_event: &Value) -> AdapterResult<Vec<CanonicalStreamEvent>> {
        (**self).process(provider_event)
    }
}

/// Translates between one client/provider wire format and the canonical
/// schema. One implementation per wire format; instances are stateless and
/// process-wide — only the associated `StreamProcessor` carries per-request
/// state.
pub trait FormatAdapter {
    type Stream: StreamProcessor;

    /// Name used in logs and in `path::select_path`.
    fn format_name(&self) -> &'static str;

    fn client_to_canonical(&self, client_req: &Value) -> AdapterResult<CanonicalRequest>;

    fn canonical_to_provider(&self, req: &CanonicalRequest) -> Value;

    fn provider_to_canonical(&self, provider_resp: &Value) -> AdapterResult<CanonicalResponse>;

    fn canonical_to_client(&self, resp: &CanonicalResponse) -> Value;

    /// Construct a fresh streaming processor for one request.
    fn new_stream_processor(&self) -> Self::Stream;
}
