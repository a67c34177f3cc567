//! Migration orchestrator - main workflow coordinator.
//!
//! Tables run strictly one after another in rank order:
//! extract every page, transform every record, load in one transaction.
//! A table that fails is recorded and the run moves on; only cancellation
//! stops new tables from starting. After the last table every table is
//! reconciled.

mod report;

pub use report::{MigrationRun, RunLog, RunPhase, TableRun, TableStatus};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MigrationConfig;
use crate::core::{sort_by_rank, SourceReader, TableSpec, TargetWriter};
use crate::error::MigrateError;
use crate::extract::Extractor;
use crate::load::Loader;
use crate::transform::transform_record;
use crate::verify::Verifier;

/// Drives the ranked table list from a source into the target.
pub struct Orchestrator {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    page_size: usize,
    batch_size: usize,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create a new orchestrator over already-connected endpoints.
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            source,
            target,
            page_size: config.page_size,
            batch_size: config.batch_size,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the migration over `specs`.
    ///
    /// Never fails as a whole: per-table problems are recorded in the
    /// returned run, which always ends in [`RunPhase::Completed`].
    pub async fn run(&self, specs: &[TableSpec]) -> MigrationRun {
        let mut run = MigrationRun::new();
        let mut specs = specs.to_vec();
        sort_by_rank(&mut specs);

        info!(
            "Starting migration run {} ({} -> {}, {} tables)",
            run.run_id,
            self.source.db_type(),
            self.target.db_type(),
            specs.len()
        );
        run.phase = RunPhase::Running;

        for spec in &specs {
            let table_run = if self.cancel.is_cancelled() {
                TableRun::empty(&spec.name, spec.rank, TableStatus::Cancelled)
            } else {
                self.migrate_table(spec).await
            };
            run.tables.push(table_run);
        }

        if self.cancel.is_cancelled() {
            warn!("Run cancelled, skipping reconciliation");
        } else {
            run.phase = RunPhase::Verifying;
            info!("Verifying row counts");
            let verifier = Verifier::new(self.source.as_ref(), self.target.as_ref());
            for spec in &specs {
                run.reconciliation.push(verifier.verify(&spec.name).await);
            }
        }

        run.finished_at = Some(Utc::now());
        run.phase = RunPhase::Completed;

        info!(
            "Run {} completed: {} tables imported, {} failed, {} records in {:.2}s",
            run.run_id,
            run.tables_imported(),
            run.tables_failed(),
            run.total_records(),
            run.duration_seconds()
        );
        let mismatched: Vec<_> = run.mismatches().map(|r| r.table.as_str()).collect();
        if !mismatched.is_empty() {
            warn!("Row counts differ for: {}", mismatched.join(", "));
        }

        run
    }

    async fn migrate_table(&self, spec: &TableSpec) -> TableRun {
        let started = Instant::now();
        let mut table_run = self.process_table(spec).await;
        table_run.duration_ms = started.elapsed().as_millis() as u64;
        table_run
    }

    async fn process_table(&self, spec: &TableSpec) -> TableRun {
        let table = spec.name.as_str();

        match self.source.table_exists(table).await {
            Ok(true) => {}
            Ok(false) => {
                info!("{}: not present in source, skipping", table);
                return TableRun::empty(table, spec.rank, TableStatus::Skipped);
            }
            Err(e) => {
                error!("{}: failed - {}", table, e);
                return TableRun::failed(table, spec.rank, e);
            }
        }

        let extracted = match Extractor::new(self.source.as_ref(), self.page_size)
            .extract_all(table, &self.cancel)
            .await
        {
            Ok(extracted) => extracted,
            Err(MigrateError::Cancelled) => {
                warn!("{}: cancelled during extraction", table);
                return TableRun::empty(table, spec.rank, TableStatus::Cancelled);
            }
            Err(e) => {
                error!("{}: failed - {}", table, e);
                return TableRun::failed(table, spec.rank, e);
            }
        };

        let count = extracted.records.len() as u64;
        if count == 0 {
            info!("{}: empty in source, skipping", table);
            return TableRun::empty(table, spec.rank, TableStatus::Skipped);
        }
        info!(
            "{}: extracted {} records in {} pages",
            table, count, extracted.pages
        );

        let records: Vec<_> = extracted.records.into_iter().map(transform_record).collect();

        match Loader::new(self.target.as_ref(), self.batch_size)
            .load(table, &records, &self.cancel)
            .await
        {
            Ok(stats) => TableRun {
                extracted: count,
                loaded: stats.loaded,
                skipped_duplicates: stats.skipped_duplicates,
                failed: stats.failed,
                ..TableRun::empty(
                    table,
                    spec.rank,
                    if stats.cancelled {
                        TableStatus::Cancelled
                    } else {
                        TableStatus::Completed
                    },
                )
            },
            Err(e) => {
                error!("{}: failed - {}", table, e);
                TableRun {
                    extracted: count,
                    ..TableRun::failed(table, spec.rank, e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::{numbered_records, record, MemorySource, MemoryTarget};
    use crate::core::Record;
    use serde_json::json;

    fn config(page_size: usize, batch_size: usize) -> MigrationConfig {
        MigrationConfig {
            page_size,
            batch_size,
            ..MigrationConfig::default()
        }
    }

    fn specs(names: &[&str]) -> Vec<TableSpec> {
        names
            .iter()
            .enumerate()
            .map(|(rank, name)| TableSpec::new(*name, rank as u32))
            .collect()
    }

    fn orchestrator(source: MemorySource, target: &MemoryTarget) -> Orchestrator {
        Orchestrator::new(Arc::new(source), Arc::new(target.clone()), &config(1000, 1000))
    }

    fn position(events: &[String], event: &str) -> usize {
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("missing event {event}"))
    }

    #[tokio::test]
    async fn test_run_twice_is_idempotent() {
        let target = MemoryTarget::new();
        let tables = specs(&["branches", "leads"]);
        let source = || {
            MemorySource::new()
                .with_table("branches", numbered_records(3))
                .with_table("leads", numbered_records(2500))
        };

        let first = orchestrator(source(), &target).run(&tables).await;
        let second = orchestrator(source(), &target).run(&tables).await;

        assert_eq!(first.total_records(), 2503);
        assert_eq!(second.total_records(), 0);
        assert_eq!(second.total_skipped_duplicates(), 2503);
        assert_eq!(target.rows("leads").len(), 2500);
        assert!(second.reconciliation.iter().all(|r| r.matches));
    }

    #[tokio::test]
    async fn test_parents_load_before_children() {
        let target = MemoryTarget::new();
        let source = MemorySource::new()
            .with_table("branches", numbered_records(2))
            .with_table("dashboard_users", numbered_records(2))
            .with_table("leads", numbered_records(2));
        let tables = vec![
            TableSpec::new("leads", 2),
            TableSpec::new("branches", 0),
            TableSpec::new("dashboard_users", 1),
        ];

        let run = orchestrator(source, &target).run(&tables).await;

        let names: Vec<_> = run.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["branches", "dashboard_users", "leads"]);
        let events = target.events();
        assert!(position(&events, "commit:branches") < position(&events, "begin:leads"));
        assert!(position(&events, "commit:dashboard_users") < position(&events, "begin:leads"));
    }

    #[tokio::test]
    async fn test_clean_run_reconciles() {
        let target = MemoryTarget::new();
        let source = MemorySource::new()
            .with_table("branches", numbered_records(10))
            .with_table("courses", numbered_records(1200));

        let run = orchestrator(source, &target)
            .run(&specs(&["branches", "courses"]))
            .await;

        assert_eq!(run.phase, RunPhase::Completed);
        assert_eq!(run.total_failed_rows(), 0);
        assert_eq!(run.reconciliation.len(), 2);
        for result in &run.reconciliation {
            assert!(result.matches, "{:?}", result);
            assert_eq!(result.source_count, result.target_count);
        }
    }

    #[tokio::test]
    async fn test_read_failure_is_isolated_to_its_table() {
        let target = MemoryTarget::new();
        let source = MemorySource::new()
            .with_table("branches", numbered_records(4))
            .failing("universities")
            .with_table("leads", numbered_records(7))
            .with_table("students", numbered_records(5));

        let run = orchestrator(source, &target)
            .run(&specs(&["branches", "universities", "leads", "students"]))
            .await;

        let universities = run.table("universities").unwrap();
        assert_eq!(universities.status, TableStatus::Failed);
        assert_eq!(universities.extracted, 0);
        assert_eq!(universities.loaded, 0);
        assert!(universities.error.is_some());

        assert_eq!(run.table("leads").unwrap().loaded, 7);
        assert_eq!(run.table("students").unwrap().loaded, 5);
        assert_eq!(run.tables_failed(), 1);
        assert_eq!(run.phase, RunPhase::Completed);
    }

    #[tokio::test]
    async fn test_load_failure_keeps_extracted_count_and_moves_on() {
        let target = MemoryTarget::new().failing_fk_toggle();
        let source = MemorySource::new()
            .with_table("branches", numbered_records(4))
            .with_table("leads", numbered_records(6));

        let run = orchestrator(source, &target)
            .run(&specs(&["branches", "leads"]))
            .await;

        let branches = run.table("branches").unwrap();
        assert_eq!(branches.status, TableStatus::Failed);
        assert_eq!(branches.extracted, 4);
        assert_eq!(branches.loaded, 0);
        assert!(branches.error.is_some());

        let events = target.events();
        assert!(position(&events, "rollback:branches") < position(&events, "begin:leads"));
        assert_eq!(run.table("leads").unwrap().extracted, 6);
        assert_eq!(run.tables_failed(), 2);
        assert_eq!(run.phase, RunPhase::Completed);
        assert_eq!(run.reconciliation.len(), 2);
    }

    #[tokio::test]
    async fn test_absent_and_empty_tables_are_skipped() {
        let target = MemoryTarget::new();
        let source = MemorySource::new().with_table("courses", Vec::new());

        let run = orchestrator(source, &target)
            .run(&specs(&["payroll", "courses"]))
            .await;

        for table in &run.tables {
            assert_eq!(table.status, TableStatus::Skipped);
            assert_eq!(table.extracted, 0);
        }
        assert!(target.events().is_empty());
        assert!(run.reconciliation.iter().all(|r| r.matches));
    }

    #[tokio::test]
    async fn test_records_are_transformed_before_load() {
        let target = MemoryTarget::new();
        let rows: Vec<Record> = vec![record(json!({
            "id": 1,
            "tags": ["a", "b"],
            "is_active": true,
            "created_at": "2024-03-05T14:30:00.000Z"
        }))];
        let source = MemorySource::new().with_table("leads", rows);

        orchestrator(source, &target).run(&specs(&["leads"])).await;

        let loaded = target.rows("leads");
        assert_eq!(loaded[0]["tags"], json!("[\"a\",\"b\"]"));
        assert_eq!(loaded[0]["is_active"], json!(1));
        assert_eq!(loaded[0]["created_at"], json!("2024-03-05 14:30:00"));
    }

    #[tokio::test]
    async fn test_row_failures_are_counted_not_fatal() {
        let target = MemoryTarget::new().rejecting_field("bad");
        let rows = vec![
            record(json!({"id": 1})),
            record(json!({"id": 2, "bad": "x"})),
        ];
        let source = MemorySource::new().with_table("payments", rows);

        let run = orchestrator(source, &target).run(&specs(&["payments"])).await;

        let payments = run.table("payments").unwrap();
        assert_eq!(payments.status, TableStatus::Completed);
        assert_eq!(payments.loaded, 1);
        assert_eq!(payments.failed, 1);
        let mismatched: Vec<_> = run.mismatches().map(|r| r.table.as_str()).collect();
        assert_eq!(mismatched, ["payments"]);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_every_table() {
        let target = MemoryTarget::new();
        let source = MemorySource::new()
            .with_table("branches", numbered_records(3))
            .with_table("leads", numbered_records(3));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = orchestrator(source, &target)
            .with_cancel(cancel)
            .run(&specs(&["branches", "leads"]))
            .await;

        assert_eq!(run.phase, RunPhase::Completed);
        assert_eq!(run.tables_cancelled(), 2);
        assert!(run.reconciliation.is_empty());
        assert!(target.events().is_empty());
    }
}
