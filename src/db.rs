//! Read-only summary of the bot's SQLite backtest database
//!
//! Tables are optional: `market_outcomes(outcome)`, `simulated_trades(outcome,
//! side, pnl)` and `snapshots`. Missing tables or columns are skipped.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketOutcomeSummary {
    pub rows: i64,
    pub by_outcome: Vec<ValueCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSummary {
    pub rows: i64,
    pub by_outcome: Vec<ValueCount>,
    pub by_side: Vec<ValueCount>,
    pub pnl_total: Option<f64>,
    pub pnl_mean: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestDbSummary {
    pub market_outcomes: Option<MarketOutcomeSummary>,
    pub trades: Option<TradeSummary>,
    pub snapshots: Option<i64>,
}

/// Summarize `path`, `Ok(None)` if the file does not exist
pub fn summarize_backtest_db(path: &Path) -> Result<Option<BacktestDbSummary>> {
    if !path.exists() {
        return Ok(None);
    }

    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Failed to open backtest database: {}", path.display()))?;

    summarize_connection(&conn).map(Some)
}

pub fn summarize_connection(conn: &Connection) -> Result<BacktestDbSummary> {
    let mut summary = BacktestDbSummary::default();

    if let Some(columns) = table_columns(conn, "market_outcomes")? {
        let rows = count_rows(conn, "market_outcomes")?;
        let by_outcome = if columns.iter().any(|c| c == "outcome") {
            count_by(conn, "market_outcomes", "outcome")?
        } else {
            Vec::new()
        };
        summary.market_outcomes = Some(MarketOutcomeSummary { rows, by_outcome });
    }

    if let Some(columns) = table_columns(conn, "simulated_trades")? {
        let has = |name: &str| columns.iter().any(|c| c == name);

        let rows = count_rows(conn, "simulated_trades")?;
        let by_outcome = if has("outcome") {
            count_by(conn, "simulated_trades", "outcome")?
        } else {
            Vec::new()
        };
        let by_side = if has("side") {
            count_by(conn, "simulated_trades", "side")?
        } else {
            Vec::new()
        };
        let (pnl_total, pnl_mean) = if has("pnl") {
            conn.query_row("SELECT SUM(pnl), AVG(pnl) FROM simulated_trades", [], |row| {
                Ok((row.get::<_, Option<f64>>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .context("Failed to aggregate trade pnl")?
        } else {
            (None, None)
        };

        summary.trades = Some(TradeSummary {
            rows,
            by_outcome,
            by_side,
            pnl_total,
            pnl_mean,
        });
    }

    if table_columns(conn, "snapshots")?.is_some() {
        summary.snapshots = Some(count_rows(conn, "snapshots")?);
    }

    Ok(summary)
}

/// Column names of `table`, `None` if the table does not exist
fn table_columns(conn: &Connection, table: &str) -> Result<Option<Vec<String>>> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(None);
    }

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(columns))
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}

/// Row counts per distinct value, most frequent first
fn count_by(conn: &Connection, table: &str, column: &str) -> Result<Vec<ValueCount>> {
    let query = format!(
        "SELECT CAST({col} AS TEXT), COUNT(*) FROM {table} GROUP BY {col} ORDER BY COUNT(*) DESC, 1",
        col = column,
        table = table
    );
    let mut stmt = conn.prepare(&query)?;
    let counts = stmt
        .query_map([], |row| {
            Ok(ValueCount {
                value: row.get::<_, Option<String>>(0)?.unwrap_or_else(|| "NULL".to_string()),
                count: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(counts)
}
