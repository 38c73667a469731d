//! The budget service: a single advisory spend limit, stored as one
//! singleton row (`id = 1`, upsert semantics) since there is only ever one
//! active budget.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::StoreResult;
use crate::usage::UsageStore;

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetSettings {
    /// `None` disables budget enforcement entirely.
    pub amount_usd: Option<f64>,
    /// When `true`, crossing the limit only warns; when `false`, crossing it
    /// also emits a structured warning — the pipeline never blocks the
    /// request either way, the policy is advisory only.
    pub alert_only: bool,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self { amount_usd: None, alert_only: true }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BudgetStatus {
    pub settings: BudgetSettings,
    pub spent_month_to_date: f64,
    /// `amountUsd - spentMonthToDate`, or `None` when no ceiling is set.
    pub remaining: Option<f64>,
}

pub struct BudgetStore {
    conn: Arc<Mutex<Connection>>,
}

impl BudgetStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS budget (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                amount_usd REAL,
                alert_only INTEGER NOT NULL DEFAULT 1
            );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Validates `amount_usd >= 0` (or `None` to disable), then upserts the
    /// singleton row.
    pub fn upsert(&self, amount_usd: Option<f64>, alert_only: bool) -> StoreResult<BudgetSettings> {
        if let Some(amount) = amount_usd {
            if amount < 0.0 {
                return Err(crate::error::StoreError::Other("amountUsd must be >= 0".into()));
            }
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO budget (id, amount_usd, alert_only) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET amount_usd = excluded.amount_usd, alert_only = excluded.alert_only",
            params![amount_usd, alert_only as i64],
        )?;
        Ok(BudgetSettings { amount_usd, alert_only })
    }

    pub fn settings(&self) -> StoreResult<BudgetSettings> {
        let conn = self.conn.lock();
        let row = conn
            .query_row("SELECT amount_usd, alert_only FROM budget WHERE id = 1", [], |r| {
                Ok(BudgetSettings {
                    amount_usd: r.get(0)?,
                    alert_only: r.get::<_, i64>(1)? != 0,
                })
            })
            .ok();
        Ok(row.unwrap_or_default())
    }

    /// Merges the stored settings with `spent = sum(total_cost) WHERE
    /// timestamp >= start-of-current-month`, reading from the usage
    /// ledger's own connection.
    pub fn status(&self, usage: &UsageStore) -> StoreResult<BudgetStatus> {
        let settings = self.settings()?;
        let spent_month_to_date = usage.spent_since(start_of_month(Utc::now()))?;
        let remaining = settings.amount_usd.map(|amount| amount - spent_month_to_date);
        Ok(BudgetStatus { settings, spent_month_to_date, remaining })
    }

    /// Whether `additional_cost` would cross the configured limit, given
    /// `spent_so_far`. Advisory only — callers decide what to do with the
    /// answer; this never gates a request itself.
    pub fn would_cross_limit(&self, settings: &BudgetSettings, spent_so_far: f64, additional_cost: f64) -> bool {
        match settings.amount_usd {
            None => false,
            Some(limit) => spent_so_far + additional_cost > limit,
        }
    }
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).single().unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::{CostAmounts, TokenCounts};

    #[test]
    fn upsert_rejects_negative_amount() {
        let store = BudgetStore::open_in_memory().unwrap();
        let err = store.upsert(Some(-10.0), true);
        assert!(err.is_err());
    }

    #[test]
    fn null_amount_disables_enforcement() {
        let store = BudgetStore::open_in_memory().unwrap();
        store.upsert(Some(100.0), false).unwrap();
        store.upsert(None, false).unwrap();
        let settings = store.settings().unwrap();
        assert_eq!(settings.amount_usd, None);
        assert!(!store.would_cross_limit(&settings, 1_000_000.0, 1.0));
    }

    #[test]
    fn s5_budget_arithmetic_matches_literal_scenario() {
        let budget = BudgetStore::open_in_memory().unwrap();
        let usage = UsageStore::open_in_memory().unwrap();
        budget.upsert(Some(10.0), false).unwrap();

        let tokens = TokenCounts {
            input_tokens: 1000,
            cache_write_input_tokens: 0,
            cache_read_input_tokens: 0,
            output_tokens: 500,
        };
        let cost = CostAmounts {
            input_cost: 2.5,
            cache_write_cost: 0.0,
            cache_read_cost: 0.0,
            output_cost: 1.0,
            total_cost: 3.5,
            currency: "USD".into(),
        };
        usage.record("req-1", "openai", "gpt-4o", Utc::now(), tokens, cost).unwrap();

        let status = budget.status(&usage).unwrap();
        assert_eq!(status.settings.amount_usd, Some(10.0));
        assert!(!status.settings.alert_only);
        assert_eq!(status.spent_month_to_date, 3.5);
        assert_eq!(status.remaining, Some(6.5));
    }

    #[test]
    fn remaining_is_none_when_no_ceiling_is_set() {
        let budget = BudgetStore::open_in_memory().unwrap();
        let usage = UsageStore::open_in_memory().unwrap();
        budget.upsert(None, true).unwrap();

        let status = budget.status(&usage).unwrap();
        assert_eq!(status.remaining, None);
    }

    #[test]
    fn would_cross_limit_is_advisory_only_never_enforced_here() {
        let budget = BudgetStore::open_in_memory().unwrap();
        let settings = budget.upsert(Some(10.0), false).unwrap();
        assert!(budget.would_cross_limit(&settings, 9.0, 2.0));
        assert!(!budget.would_cross_limit(&settings, 1.0, 2.0));
    }
}
