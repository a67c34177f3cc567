//! Transactional, idempotent loading of one table into the target.
//!
//! A table is loaded inside a single transaction with foreign-key checks
//! suspended. Records are inserted one at a time so each gets its own
//! [`InsertOutcome`]: duplicates are counted and skipped (this is what makes
//! re-running a migration safe), other rejections are counted and logged, and
//! neither aborts the table. Only failing to open, toggle constraints on, or
//! commit the transaction is fatal to the table.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{InsertOutcome, Record, TargetTransaction, TargetWriter};
use crate::error::{MigrateError, Result};

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Per-table load counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub loaded: u64,
    pub skipped_duplicates: u64,
    pub failed: u64,

    /// Set when cancellation stopped the load between batches. Batches
    /// applied before that point were committed.
    #[serde(default)]
    pub cancelled: bool,
}

impl LoadStats {
    /// Fold one insert outcome into the counters.
    pub fn record(&mut self, outcome: &InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.loaded += 1,
            InsertOutcome::Duplicate => self.skipped_duplicates += 1,
            InsertOutcome::Failed(_) => self.failed += 1,
        }
    }

    /// Records that received an outcome.
    pub fn processed(&self) -> u64 {
        self.loaded + self.skipped_duplicates + self.failed
    }
}

/// Batch writer for one table at a time.
pub struct Loader<'a> {
    target: &'a dyn TargetWriter,
    batch_size: usize,
}

impl<'a> Loader<'a> {
    pub fn new(target: &'a dyn TargetWriter, batch_size: usize) -> Self {
        Self {
            target,
            batch_size: batch_size.max(1),
        }
    }

    /// Load `records` into `table`.
    ///
    /// Cancellation is honored between batches only: the current batch is
    /// finished, checks are restored, and what was applied is committed.
    pub async fn load(
        &self,
        table: &str,
        records: &[Record],
        cancel: &CancellationToken,
    ) -> Result<LoadStats> {
        let mut tx = self
            .target
            .begin(table)
            .await
            .map_err(|e| as_load_error(table, "begin transaction", e))?;

        if let Err(e) = tx.set_foreign_key_checks(false).await {
            abandon(tx, table).await;
            return Err(as_load_error(table, "disable foreign key checks", e));
        }

        let stats = self.insert_batches(tx.as_mut(), table, records, cancel).await;

        if let Err(e) = tx.set_foreign_key_checks(true).await {
            abandon(tx, table).await;
            return Err(as_load_error(table, "re-enable foreign key checks", e));
        }

        tx.commit()
            .await
            .map_err(|e| as_load_error(table, "commit", e))?;

        info!(
            "{}: loaded {}, skipped {} duplicates, {} failed",
            table, stats.loaded, stats.skipped_duplicates, stats.failed
        );
        Ok(stats)
    }

    async fn insert_batches(
        &self,
        tx: &mut dyn TargetTransaction,
        table: &str,
        records: &[Record],
        cancel: &CancellationToken,
    ) -> LoadStats {
        let mut stats = LoadStats::default();
        let batches = records.len().div_ceil(self.batch_size);

        for (batch_idx, batch) in records.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "{}: cancelled after {} of {} batches",
                    table, batch_idx, batches
                );
                stats.cancelled = true;
                break;
            }

            for record in batch {
                let outcome = tx.insert(table, record).await;
                match &outcome {
                    InsertOutcome::Inserted => {}
                    InsertOutcome::Duplicate => {
                        debug!("{}: skipping duplicate row", table);
                    }
                    InsertOutcome::Failed(reason) => {
                        warn!("{}: row insert failed: {}", table, reason);
                    }
                }
                stats.record(&outcome);
            }

            debug!(
                "{}: batch {}/{} done ({} rows processed)",
                table,
                batch_idx + 1,
                batches,
                stats.processed()
            );
        }

        stats
    }
}

/// Roll back after a fatal error; the original error is what gets reported.
async fn abandon(tx: Box<dyn TargetTransaction>, table: &str) {
    if let Err(e) = tx.rollback().await {
        warn!("{}: rollback failed: {}", table, e);
    }
}

fn as_load_error(table: &str, step: &str, err: MigrateError) -> MigrateError {
    match err {
        e @ MigrateError::Load { .. } => e,
        other => MigrateError::load(table, format!("{}: {}", step, other)),
    }
}
