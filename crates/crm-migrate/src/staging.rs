//! Intermediate JSON files between the export and import passes.
//!
//! Layout of a data directory:
//!
//! ```text
//! <dir>/<table>.json      JSON array of raw source records
//! <dir>/_metadata.json    {"exportedAt", "tables": {name: count}, "totalRecords"}
//! <dir>/import-log.json   run log written after an import
//! ```
//!
//! Files hold records exactly as the source returned them; conversion
//! happens on import, so an export can be re-imported after transformation
//! rules change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{sort_by_rank, Record, SourceReader, TableSpec};
use crate::error::{MigrateError, Result};
use crate::extract::Extractor;
use crate::orchestrator::{MigrationRun, RunPhase, TableRun, TableStatus};

/// Export summary file name.
pub const METADATA_FILE: &str = "_metadata.json";

/// Run log file name.
pub const RUN_LOG_FILE: &str = "import-log.json";

/// Serialize `value` as pretty JSON to `path` via a temp file and rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Contents of `_metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub tables: BTreeMap<String, u64>,
    pub total_records: u64,
}

impl ExportMetadata {
    /// Summarize the tables an export run wrote.
    pub fn from_run(run: &MigrationRun) -> Self {
        let tables: BTreeMap<String, u64> = run
            .tables
            .iter()
            .filter(|t| t.status == TableStatus::Completed)
            .map(|t| (t.name.clone(), t.extracted))
            .collect();
        Self {
            exported_at: run.finished_at.unwrap_or_else(Utc::now),
            total_records: tables.values().sum(),
            tables,
        }
    }
}

/// A data directory of per-table JSON files.
///
/// Also a [`SourceReader`], so an import is just an orchestrator run with
/// the store as its source. A table without a file is an absent table. The
/// most recently read table stays cached so paging through it parses the
/// file once.
pub struct StagingStore {
    dir: PathBuf,
    cache: Mutex<Option<(String, Arc<Vec<Record>>)>>,
}

impl StagingStore {
    /// Store rooted at `dir`, which need not exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(None),
        }
    }

    /// Store over an existing directory.
    ///
    /// A missing directory is a configuration error: there is nothing to
    /// import.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(dir);
        if !store.dir.is_dir() {
            return Err(MigrateError::Config(format!(
                "data directory not found: {} (run export first)",
                store.dir.display()
            )));
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.json", table))
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.dir.join(RUN_LOG_FILE)
    }

    /// Create the directory if needed.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn write_table(&self, table: &str, records: &[Record]) -> Result<()> {
        write_json_atomic(&self.table_path(table), records)
    }

    /// Read a table file; `None` when the file does not exist.
    pub fn read_table(&self, table: &str) -> Result<Option<Vec<Record>>> {
        let path = self.table_path(table);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let records = serde_json::from_str(&content).map_err(|e| {
            MigrateError::Staging(format!("{} is not a JSON array of objects: {}", path.display(), e))
        })?;
        Ok(Some(records))
    }

    pub fn write_metadata(&self, metadata: &ExportMetadata) -> Result<()> {
        write_json_atomic(&self.dir.join(METADATA_FILE), metadata)
    }

    /// Read `_metadata.json`; `None` when the file does not exist.
    pub fn read_metadata(&self) -> Result<Option<ExportMetadata>> {
        let path = self.dir.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let metadata = serde_json::from_str(&content)
            .map_err(|e| MigrateError::Staging(format!("{}: {}", path.display(), e)))?;
        Ok(Some(metadata))
    }

    async fn cached_table(&self, table: &str) -> Result<Arc<Vec<Record>>> {
        let mut cache = self.cache.lock().await;
        if let Some((name, records)) = cache.as_ref() {
            if name == table {
                return Ok(Arc::clone(records));
            }
        }
        let records = Arc::new(self.read_table(table)?.unwrap_or_default());
        debug!("{}: loaded {} records from staging", table, records.len());
        *cache = Some((table.to_string(), Arc::clone(&records)));
        Ok(records)
    }
}

#[async_trait]
impl SourceReader for StagingStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.table_path(table).is_file())
    }

    async fn read_page(&self, table: &str, offset: u64, limit: usize) -> Result<Vec<Record>> {
        let records = self.cached_table(table).await?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(records.len());
        let end = start.saturating_add(limit).min(records.len());
        Ok(records[start..end].to_vec())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self.cached_table(table).await?.len() as i64)
    }

    fn db_type(&self) -> &str {
        "json"
    }

    async fn close(&self) {
        self.cache.lock().await.take();
    }
}

/// Copies every source table into a [`StagingStore`].
pub struct Exporter<'a> {
    source: &'a dyn SourceReader,
    store: &'a StagingStore,
    page_size: usize,
    cancel: CancellationToken,
}

impl<'a> Exporter<'a> {
    pub fn new(source: &'a dyn SourceReader, store: &'a StagingStore, page_size: usize) -> Self {
        Self {
            source,
            store,
            page_size,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally controlled cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Export `specs` in rank order and write the metadata file.
    ///
    /// Per-table failures are recorded in the returned run; only failing to
    /// create the directory or write the metadata is an error.
    pub async fn export(&self, specs: &[TableSpec]) -> Result<(MigrationRun, ExportMetadata)> {
        self.store.ensure_dir()?;

        let mut specs = specs.to_vec();
        sort_by_rank(&mut specs);

        let mut run = MigrationRun::new();
        run.phase = RunPhase::Running;
        info!(
            "Exporting {} tables from {} to {}",
            specs.len(),
            self.source.db_type(),
            self.store.dir().display()
        );

        for spec in &specs {
            let table_run = if self.cancel.is_cancelled() {
                TableRun::empty(&spec.name, spec.rank, TableStatus::Cancelled)
            } else {
                let started = Instant::now();
                let mut table_run = self.export_table(spec).await;
                table_run.duration_ms = started.elapsed().as_millis() as u64;
                table_run
            };
            run.tables.push(table_run);
        }

        run.finished_at = Some(Utc::now());
        run.phase = RunPhase::Completed;

        let metadata = ExportMetadata::from_run(&run);
        self.store.write_metadata(&metadata)?;
        info!(
            "Export complete: {} records across {} tables",
            metadata.total_records,
            metadata.tables.len()
        );

        Ok((run, metadata))
    }

    async fn export_table(&self, spec: &TableSpec) -> TableRun {
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

        let extracted = match Extractor::new(self.source, self.page_size)
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
        if let Err(e) = self.store.write_table(table, &extracted.records) {
            error!("{}: failed to write staging file - {}", table, e);
            return TableRun {
                extracted: count,
                ..TableRun::failed(table, spec.rank, e)
            };
        }

        info!("{}: exported {} records", table, count);
        TableRun {
            extracted: count,
            ..TableRun::empty(table, spec.rank, TableStatus::Completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::{numbered_records, record, MemorySource};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_dir_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = StagingStore::open(dir.path().join("nope")).err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_table_file_round_trip_keeps_field_order() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());
        let rows = vec![record(json!({"z": 1, "a": [1, 2], "m": {"k": true}}))];

        store.write_table("leads", &rows).unwrap();
        let loaded = store.read_table("leads").unwrap().unwrap();

        assert_eq!(loaded, rows);
        let keys: Vec<_> = loaded[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["z", "a", "m"]);
        assert!(!dir.path().join("leads.tmp").exists());
    }

    #[test]
    fn test_malformed_table_file_is_staging_error() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());
        std::fs::write(store.table_path("leads"), "{\"not\": \"an array\"}").unwrap();

        let err = store.read_table("leads").unwrap_err();
        assert!(matches!(err, MigrateError::Staging(_)));
    }

    #[tokio::test]
    async fn test_store_as_source_pages_through_file() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path());
        store.write_table("courses", &numbered_records(25)).unwrap();

        assert!(store.table_exists("courses").await.unwrap());
        assert!(!store.table_exists("payroll").await.unwrap());
        assert_eq!(store.row_count("courses").await.unwrap(), 25);

        let page = store.read_page("courses", 20, 10).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0]["id"], 21);
        assert!(store.read_page("courses", 40, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_writes_tables_and_metadata() {
        let dir = TempDir::new().unwrap();
        let store = StagingStore::new(dir.path().join("data"));
        let source = MemorySource::new()
            .with_table("branches", numbered_records(3))
            .with_table("leads", numbered_records(1500))
            .failing("universities");
        let specs = vec![
            TableSpec::new("branches", 0),
            TableSpec::new("universities", 1),
            TableSpec::new("leads", 2),
            TableSpec::new("payroll", 3),
        ];

        let (run, metadata) = Exporter::new(&source, &store, 1000)
            .export(&specs)
            .await
            .unwrap();

        assert_eq!(run.table("universities").unwrap().status, TableStatus::Failed);
        assert_eq!(run.table("payroll").unwrap().status, TableStatus::Skipped);
        assert_eq!(metadata.total_records, 1503);
        assert_eq!(metadata.tables.get("leads"), Some(&1500));
        assert!(!metadata.tables.contains_key("universities"));

        assert_eq!(store.read_table("leads").unwrap().unwrap().len(), 1500);
        assert!(store.read_table("universities").unwrap().is_none());
        assert_eq!(store.read_metadata().unwrap(), Some(metadata));
    }

    #[test]
    fn test_metadata_uses_camel_case_keys() {
        let metadata = ExportMetadata {
            exported_at: Utc::now(),
            tables: BTreeMap::from([("branches".to_string(), 2)]),
            total_records: 2,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("exportedAt").is_some());
        assert_eq!(value["totalRecords"], 2);
        assert_eq!(value["tables"]["branches"], 2);
    }
}
