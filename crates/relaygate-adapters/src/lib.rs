//! # relaygate-adapters
//!
//! Bidirectional format adapters: client wire format ↔ canonical schema ↔
//! provider wire format, plus the per-format stateful streaming processors
//! and the passthrough/adapter path decision.

pub mod anthropic;
pub mod openai_chat;
pub mod openai_responses;
pub mod path;
pub mod traits;

pub use path::{select_path, Path};
pub use traits::{AdapterError, FormatAdapter, StreamProcessor};
