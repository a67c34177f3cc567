//! In-memory source and target used by the engine's tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{MigrateError, Result};

use super::record::Record;
use super::traits::{InsertOutcome, SourceReader, TargetTransaction, TargetWriter};

/// Build `count` records shaped like `{"id": n, "name": "row-n"}`.
pub fn numbered_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| record(json!({ "id": i as i64 + 1, "name": format!("row-{}", i + 1) })))
        .collect()
}

/// Convert a JSON object literal into a [`Record`].
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("record() expects an object, got {other}"),
    }
}

/// Source backed by vectors, with optional injected read failures.
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<String, Vec<Record>>,
    failing: HashSet<String>,
    requests: Mutex<Vec<(String, u64, usize)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, records: Vec<Record>) -> Self {
        self.tables.insert(name.to_string(), records);
        self
    }

    /// Every page read of `name` fails.
    pub fn failing(mut self, name: &str) -> Self {
        self.tables.entry(name.to_string()).or_default();
        self.failing.insert(name.to_string());
        self
    }

    /// `(table, offset, limit)` for every page requested so far.
    pub fn requests(&self) -> Vec<(String, u64, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.tables.contains_key(table))
    }

    async fn read_page(&self, table: &str, offset: u64, limit: usize) -> Result<Vec<Record>> {
        self.requests
            .lock()
            .unwrap()
            .push((table.to_string(), offset, limit));
        if self.failing.contains(table) {
            return Err(MigrateError::source_read(table, "injected read failure"));
        }
        let rows = self.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
        let start = (offset as usize).min(rows.len());
        let end = (start + limit).min(rows.len());
        Ok(rows[start..end].to_vec())
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self.tables.get(table).map(|r| r.len() as i64).unwrap_or(0))
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

#[derive(Default)]
struct TargetState {
    tables: HashMap<String, Vec<Record>>,
    events: Vec<String>,
    inserts: usize,
}

/// Target keyed on the `id` field, recording every transaction event.
#[derive(Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
    reject_field: Option<String>,
    fail_fk_toggle: bool,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records carrying this field fail with a non-duplicate error.
    pub fn rejecting_field(mut self, field: &str) -> Self {
        self.reject_field = Some(field.to_string());
        self
    }

    /// Toggling foreign-key checks fails.
    pub fn failing_fk_toggle(mut self) -> Self {
        self.fail_fk_toggle = true;
        self
    }

    /// Cancel `token` once `inserts` insert calls have been made.
    pub fn cancelling_after(mut self, inserts: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((inserts, token));
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        let state = self.state.lock().unwrap();
        state.tables.get(table).cloned().unwrap_or_default()
    }

    /// Events such as `begin:leads`, `fk_off`, `commit:leads`.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn begin(&self, table: &str) -> Result<Box<dyn TargetTransaction>> {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("begin:{table}"));
        Ok(Box::new(MemoryTransaction {
            target: self.clone(),
            table: table.to_string(),
            pending: Vec::new(),
        }))
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self.rows(table).len() as i64)
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}

struct MemoryTransaction {
    target: MemoryTarget,
    table: String,
    pending: Vec<Record>,
}

#[async_trait]
impl TargetTransaction for MemoryTransaction {
    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        if self.target.fail_fk_toggle {
            return Err(MigrateError::load(&self.table, "cannot toggle checks"));
        }
        let event = if enabled { "fk_on" } else { "fk_off" };
        self.target
            .state
            .lock()
            .unwrap()
            .events
            .push(event.to_string());
        Ok(())
    }

    async fn insert(&mut self, table: &str, record: &Record) -> InsertOutcome {
        let inserts = {
            let mut state = self.target.state.lock().unwrap();
            state.inserts += 1;
            state.inserts
        };
        if let Some((after, token)) = &self.target.cancel_after {
            if inserts == *after {
                token.cancel();
            }
        }
        if let Some(field) = &self.target.reject_field {
            if record.contains_key(field) {
                return InsertOutcome::Failed(format!("bad value in {field}"));
            }
        }
        let id = record.get("id").cloned().unwrap_or(Value::Null);
        let state = self.target.state.lock().unwrap();
        let committed = state.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
        let exists = committed
            .iter()
            .chain(self.pending.iter())
            .any(|r| r.get("id") == Some(&id));
        drop(state);
        if exists {
            return InsertOutcome::Duplicate;
        }
        self.pending.push(record.clone());
        InsertOutcome::Inserted
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            target,
            table,
            pending,
        } = *self;
        let mut state = target.state.lock().unwrap();
        state.events.push(format!("commit:{table}"));
        state.tables.entry(table).or_default().extend(pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut state = self.target.state.lock().unwrap();
        state.events.push(format!("rollback:{}", self.table));
        Ok(())
    }
}
