//! Run summary types: the in-memory [`MigrationRun`] and the persisted
//! [`RunLog`].

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::staging::write_json_atomic;
use crate::verify::ReconciliationResult;

/// Lifecycle of a run. A single table's failure never stops it short of
/// `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Running,
    Verifying,
    Completed,
}

/// How one table's pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Extracted and loaded (row-level failures are in the counters).
    Completed,
    /// Absent or empty in the source; nothing to do.
    Skipped,
    /// Extraction or the load transaction failed.
    Failed,
    /// Stopped by cancellation, or never started because of it.
    Cancelled,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Completed => "completed",
            TableStatus::Skipped => "skipped",
            TableStatus::Failed => "failed",
            TableStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Counters and outcome for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRun {
    pub name: String,
    pub rank: u32,
    pub status: TableStatus,
    pub extracted: u64,
    pub loaded: u64,
    pub skipped_duplicates: u64,
    pub failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TableRun {
    /// A table entry with zero counts.
    pub fn empty(name: &str, rank: u32, status: TableStatus) -> Self {
        Self {
            name: name.to_string(),
            rank,
            status,
            extracted: 0,
            loaded: 0,
            skipped_duplicates: 0,
            failed: 0,
            error: None,
            duration_ms: 0,
        }
    }

    /// A failed table entry with zero counts.
    pub fn failed(name: &str, rank: u32, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::empty(name, rank, TableStatus::Failed)
        }
    }
}

/// Everything one run did, table by table.
///
/// Created when the run starts, appended to once per table, and frozen once
/// the phase reaches `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: RunPhase,
    pub tables: Vec<TableRun>,
    #[serde(default)]
    pub reconciliation: Vec<ReconciliationResult>,
}

impl MigrationRun {
    /// Start a new run with a fresh id.
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            phase: RunPhase::Pending,
            tables: Vec::new(),
            reconciliation: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableRun> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Tables that finished without a fatal error, skipped ones included.
    pub fn tables_imported(&self) -> usize {
        self.count_status(|s| matches!(s, TableStatus::Completed | TableStatus::Skipped))
    }

    pub fn tables_failed(&self) -> usize {
        self.count_status(|s| s == TableStatus::Failed)
    }

    pub fn tables_cancelled(&self) -> usize {
        self.count_status(|s| s == TableStatus::Cancelled)
    }

    fn count_status(&self, pred: impl Fn(TableStatus) -> bool) -> usize {
        self.tables.iter().filter(|t| pred(t.status)).count()
    }

    /// Rows written to the target in this run.
    pub fn total_records(&self) -> u64 {
        self.tables.iter().map(|t| t.loaded).sum()
    }

    pub fn total_extracted(&self) -> u64 {
        self.tables.iter().map(|t| t.extracted).sum()
    }

    pub fn total_skipped_duplicates(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped_duplicates).sum()
    }

    pub fn total_failed_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }

    /// Tables whose source and target counts differ.
    pub fn mismatches(&self) -> impl Iterator<Item = &ReconciliationResult> {
        self.reconciliation.iter().filter(|r| !r.matches)
    }

    /// Wall-clock duration in seconds, up to now if still running.
    pub fn duration_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for MigrationRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Audit record written at the end of an import or migrate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLog {
    pub imported_at: DateTime<Utc>,
    pub tables_imported: usize,
    pub tables_failed: usize,
    pub total_records: u64,
    /// Seconds, formatted like `12.34s`.
    pub duration: String,
}

impl RunLog {
    pub fn from_run(run: &MigrationRun) -> Self {
        Self {
            imported_at: run.finished_at.unwrap_or_else(Utc::now),
            tables_imported: run.tables_imported(),
            tables_failed: run.tables_failed(),
            total_records: run.total_records(),
            duration: format!("{:.2}s", run.duration_seconds()),
        }
    }

    /// Write the log as pretty JSON, atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}
