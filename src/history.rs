//! Append-only trade record: one JSON line per execution.
//!
//! Nothing is ever read back; the file exists for the operator and for
//! offline analysis.

use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::arbitrage::executor::{ExecutionResult, LegResult};
use crate::error::Result;

/// Flattened record written to disk.
#[derive(Debug, Serialize)]
struct HistoryRecord<'a> {
    /// Execution start, unix milliseconds.
    ts_ms: i64,
    route: &'a str,
    stake: Decimal,
    final_amount: Decimal,
    realized_profit: Decimal,
    success: bool,
    error: Option<&'a str>,
    legs: &'a [LegResult],
}

/// Writer for the trade record file.
#[derive(Debug)]
pub struct TradeHistory {
    path: PathBuf,
}

impl TradeHistory {
    /// Create a writer targeting `path`. The file and its parent directory
    /// are created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path this history writes to.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append one execution result.
    pub fn append(&self, result: &ExecutionResult) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }

        let record = HistoryRecord {
            ts_ms: (result.started_at.unix_timestamp_nanos() / 1_000_000) as i64,
            route: &result.route,
            stake: result.stake,
            final_amount: result.final_amount,
            realized_profit: result.realized_profit,
            success: result.success,
            error: result.error.as_deref(),
            legs: &result.legs,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(&record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
