//! # relaygate-store
//!
//! The embedded accounting layer behind the gateway: a usage ledger
//! (`usage_records`, one row per billed request, idempotent on
//! `request_id`) and a singleton budget row, both backed by a single SQLite
//! file guarded by a `parking_lot::Mutex<rusqlite::Connection>` in WAL mode
//! — the same single-writer connection-management pattern the agent's
//! memory store used, narrowed here to the gateway's two accounting
//! tables.

pub mod budget;
pub mod error;
pub mod usage;

pub use budget::{BudgetSettings, BudgetStatus, BudgetStore};
pub use error::{StoreError, StoreResult};
pub use usage::{CostAmounts, TokenCounts, UsageRecord, UsageStore, UsageSummary, CSV_COLUMNS};
