//! The usage ledger: one row per billed request, idempotent on
//! `request_id` so a retried write never double-counts spend. A usage row
//! is immutable once recorded, so a duplicate insert is dropped via
//! `ON CONFLICT(request_id) DO NOTHING` rather than upserted.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Column order is frozen — a compatibility test pins this exact header row
/// for CSV export.
pub const CSV_COLUMNS: &[&str] = &[
    "request_id",
    "provider",
    "model",
    "timestamp",
    "input_tokens",
    "cache_write_input_tokens",
    "cache_read_input_tokens",
    "output_tokens",
    "total_tokens",
    "input_cost",
    "cache_write_cost",
    "cache_read_cost",
    "output_cost",
    "total_cost",
    "currency",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: i64,
    pub cache_write_input_tokens: i64,
    pub cache_read_input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenCounts {
    pub fn total(&self) -> i64 {
        self.input_tokens + self.cache_write_input_tokens + self.cache_read_input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostAmounts {
    pub input_cost: f64,
    pub cache_write_cost: f64,
    pub cache_read_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub tokens: TokenCounts,
    pub cost: CostAmounts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub total_cost: f64,
    pub total_tokens: i64,
    pub cost_by_provider: std::collections::BTreeMap<String, f64>,
    pub cost_by_model: std::collections::BTreeMap<String, f64>,
    pub records: Vec<UsageRecord>,
}

/// Default number of records a single `query` returns when the caller
/// doesn't pass an explicit limit.
pub const DEFAULT_QUERY_LIMIT: u32 = 100;

pub struct UsageStore {
    conn: Arc<Mutex<Connection>>,
}

impl UsageStore {
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
            "CREATE TABLE IF NOT EXISTS usage_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_id TEXT NOT NULL UNIQUE,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                cache_write_input_tokens INTEGER NOT NULL,
                cache_read_input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                input_cost REAL NOT NULL,
                cache_write_cost REAL NOT NULL,
                cache_read_cost REAL NOT NULL,
                output_cost REAL NOT NULL,
                total_cost REAL NOT NULL,
                currency TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_usage_timestamp ON usage_records(timestamp);
            CREATE INDEX IF NOT EXISTS idx_usage_provider ON usage_records(provider);
            CREATE INDEX IF NOT EXISTS idx_usage_model ON usage_records(model);
            CREATE INDEX IF NOT EXISTS idx_usage_total_cost ON usage_records(total_cost);",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Insert one billed request. Idempotent on `request_id`: a duplicate
    /// write (e.g. a retried pipeline after a client disconnect) is
    /// silently ignored rather than overwriting the original row.
    pub fn record(
        &self,
        request_id: &str,
        provider: &str,
        model: &str,
        timestamp: DateTime<Utc>,
        tokens: TokenCounts,
        cost: CostAmounts,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO usage_records (
                request_id, provider, model, timestamp,
                input_tokens, cache_write_input_tokens, cache_read_input_tokens, output_tokens, total_tokens,
                input_cost, cache_write_cost, cache_read_cost, output_cost, total_cost, currency
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(request_id) DO NOTHING",
            params![
                request_id,
                provider,
                model,
                timestamp.to_rfc3339(),
                tokens.input_tokens,
                tokens.cache_write_input_tokens,
                tokens.cache_read_input_tokens,
                tokens.output_tokens,
                tokens.total(),
                cost.input_cost,
                cost.cache_write_cost,
                cost.cache_read_cost,
                cost.output_cost,
                cost.total_cost,
                cost.currency,
            ],
        )?;
        Ok(())
    }

    /// Aggregate usage over `[start, end)`, most recent first, capped at
    /// `limit` records (defaults to `DEFAULT_QUERY_LIMIT`).
    pub fn query(&self, start: DateTime<Utc>, end: DateTime<Utc>, limit: Option<u32>) -> StoreResult<UsageSummary> {
        let limit = limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT request_id, provider, model, timestamp,
                    input_tokens, cache_write_input_tokens, cache_read_input_tokens, output_tokens,
                    input_cost, cache_write_cost, cache_read_cost, output_cost, total_cost, currency
             FROM usage_records
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339(), limit], row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }

        let mut agg_stmt = conn.prepare(
            "SELECT COUNT(*), COALESCE(SUM(total_cost), 0.0), COALESCE(SUM(total_tokens), 0)
             FROM usage_records WHERE timestamp >= ?1 AND timestamp < ?2",
        )?;
        let (total_requests, total_cost, total_tokens): (i64, f64, i64) =
            agg_stmt.query_row(params![start.to_rfc3339(), end.to_rfc3339()], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?;
        let total_requests = total_requests as u64;

        let mut by_provider = std::collections::BTreeMap::new();
        let mut provider_stmt = conn.prepare(
            "SELECT provider, SUM(total_cost) FROM usage_records
             WHERE timestamp >= ?1 AND timestamp < ?2 GROUP BY provider",
        )?;
        let provider_rows = provider_stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339()], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?;
        for row in provider_rows {
            let (provider, cost) = row?;
            by_provider.insert(provider, cost);
        }

        let mut by_model = std::collections::BTreeMap::new();
        let mut model_stmt = conn.prepare(
            "SELECT model, SUM(total_cost) FROM usage_records
             WHERE timestamp >= ?1 AND timestamp < ?2 GROUP BY model",
        )?;
        let model_rows = model_stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339()], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?;
        for row in model_rows {
            let (model, cost) = row?;
            by_model.insert(model, cost);
        }

        Ok(UsageSummary {
            total_requests,
            total_cost,
            total_tokens,
            cost_by_provider: by_provider,
            cost_by_model: by_model,
            records,
        })
    }

    /// Sum of `total_cost` for every row at or after `since` — the input to
    /// the budget service's `spentMonthToDate`.
    pub fn spent_since(&self, since: DateTime<Utc>) -> StoreResult<f64> {
        let conn = self.conn.lock();
        let spent: f64 = conn.query_row(
            "SELECT COALESCE(SUM(total_cost), 0.0) FROM usage_records WHERE timestamp >= ?1",
            params![since.to_rfc3339()],
            |r| r.get(0),
        )?;
        Ok(spent)
    }

    /// Serialise a summary's records as CSV with the frozen column header.
    pub fn csv_export(&self, summary: &UsageSummary) -> StoreResult<String> {
        let mut writer = csv::WriterBuilder::new().from_writer(vec![]);
        writer.write_record(CSV_COLUMNS).map_err(StoreError::Csv)?;
        for record in &summary.records {
            writer
                .write_record(&[
                    record.request_id.clone(),
                    record.provider.clone(),
                    record.model.clone(),
                    record.timestamp.to_rfc3339(),
                    record.tokens.input_tokens.to_string(),
                    record.tokens.cache_write_input_tokens.to_string(),
                    record.tokens.cache_read_input_tokens.to_string(),
                    record.tokens.output_tokens.to_string(),
                    record.tokens.total().to_string(),
                    record.cost.input_cost.to_string(),
                    record.cost.cache_write_cost.to_string(),
                    record.cost.cache_read_cost.to_string(),
                    record.cost.output_cost.to_string(),
                    record.cost.total_cost.to_string(),
                    record.cost.currency.clone(),
                ])
                .map_err(StoreError::Csv)?;
        }
        let bytes = writer.into_inner().map_err(|e| StoreError::Csv(e.into_error().into()))?;
        String::from_utf8(bytes).map_err(|e| StoreError::Other(e.to_string()))
    }

    /// Fetch a single row by `request_id`, mainly for tests confirming
    /// idempotent insert did not overwrite the original.
    pub fn find(&self, request_id: &str) -> StoreResult<Option<UsageRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT request_id, provider, model, timestamp,
                    input_tokens, cache_write_input_tokens, cache_read_input_tokens, output_tokens,
                    input_cost, cache_write_cost, cache_read_cost, output_cost, total_cost, currency
             FROM usage_records WHERE request_id = ?1",
            params![request_id],
            row_to_record,
        )
        .optional()
        .map_err(StoreError::from)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<UsageRecord> {
    let timestamp: String = row.get(3)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    Ok(UsageRecord {
        request_id: row.get(0)?,
        provider: row.get(1)?,
        model: row.get(2)?,
        timestamp,
        tokens: TokenCounts {
            input_tokens: row.get(4)?,
            cache_write_input_tokens: row.get(5)?,
            cache_read_input_tokens: row.get(6)?,
            output_tokens: row.get(7)?,
        },
        cost: CostAmounts {
            input_cost: row.get(8)?,
            cache_write_cost: row.get(9)?,
            cache_read_cost: row.get(10)?,
            output_cost: row.get(11)?,
            total_cost: row.get(12)?,
            currency: row.get(13)?,
        },
    })
}
