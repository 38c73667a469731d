//! # relaygate-cli
//!
//! Command-line interface for the gateway process.
//!
//! ## Commands
//!
//! - `relaygate serve` — Start the HTTP gateway
//! - `relaygate validate-config` — Audit configuration for hard errors and warnings
//! - `relaygate completions` — Generate shell completions

pub mod commands;

pub use commands::Cli;
