//! # relaygate-core
//!
//! The canonical intermediate representation shared by every format adapter
//! and provider client in the gateway, plus the error taxonomy surfaced at
//! the HTTP boundary. This crate defines the shared vocabulary used by every
//! other crate in the workspace.

pub mod error;
pub mod schema;
pub mod stream;

pub use error::{GatewayError, Result};
pub use schema::{
    CanonicalRequest, CanonicalResponse, Choice, ContentPart, FinishReason, GenerationParams,
    Message, Role, Tool, ToolCall, ToolChoice, Usage, CANONICAL_SCHEMA_VERSION,
};
pub use stream::{CanonicalStreamEvent, StreamEventKind};
