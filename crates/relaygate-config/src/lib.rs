//! # relaygate-config
//!
//! File + environment configuration for the gateway. Reads from
//! `relaygate.toml`, then environment variable overrides, in that
//! precedence order. Provider credentials are never part of this
//! config — they live only in `std::env` and are read directly by
//! `relaygate-providers` at client construction time. Supports
//! hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{BudgetConfig, ConfigWarning, GatewayConfig, ProviderConfig, RateLimitConfig, WarningSeverity};
