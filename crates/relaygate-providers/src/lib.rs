//! # relaygate-providers
//!
//! Provider transport clients, the model→provider router with circuit
//! breaking and retry, the pricing catalog, the SSE decoding engine, and
//! the passthrough usage-sniffing tee.

pub mod anthropic;
pub mod client;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod passthrough;
pub mod pricing;
pub mod router;
pub mod streaming;

pub use client::{ProviderClient, ProviderError};
pub use pricing::{CostBreakdown, PricingCatalog, PricingEntry};
pub use router::ModelRouter;
