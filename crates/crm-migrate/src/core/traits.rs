//! Capabilities the migration engine consumes.
//!
//! - [`SourceReader`]: paginated, read-only access to the source tables
//! - [`TargetWriter`]: opens per-table transactions and counts target rows
//! - [`TargetTransaction`]: one table's write scope on a single connection
//!
//! The engine holds these as trait objects; each driver decides how a page,
//! a transaction, or a constraint toggle maps onto its own protocol.

use async_trait::async_trait;

use crate::error::Result;

use super::record::Record;

/// Read pages of records from a source store.
///
/// Pages are requested as `[offset, offset + limit)` ranges in the store's
/// natural order, which is what makes extraction restartable from a known
/// offset.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Whether the table is present in the source at all.
    ///
    /// An absent table is migrated as empty rather than failed.
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Read up to `limit` records starting at `offset`.
    async fn read_page(&self, table: &str, offset: u64, limit: usize) -> Result<Vec<Record>>;

    /// Count the rows currently in the table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Short identifier for logs (e.g. "postgres", "json").
    fn db_type(&self) -> &str;

    /// Release connections. Called once at process end.
    async fn close(&self);
}

/// Write access to the target store.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Open the transaction scope for one table's load.
    ///
    /// The returned transaction owns its connection until it is committed or
    /// rolled back; no other writer touches the target meanwhile.
    async fn begin(&self, table: &str) -> Result<Box<dyn TargetTransaction>>;

    /// Count the rows currently in the table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Short identifier for logs (e.g. "mysql").
    fn db_type(&self) -> &str;

    /// Release connections. Called once at process end.
    async fn close(&self);
}

/// A single table's write scope on the target.
#[async_trait]
pub trait TargetTransaction: Send {
    /// Enable or suspend foreign-key enforcement for this scope's connection.
    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()>;

    /// Insert one record using exactly the record's own columns.
    ///
    /// Never fails the scope: every driver error is folded into the outcome.
    async fn insert(&mut self, table: &str, record: &Record) -> InsertOutcome;

    /// Commit everything inserted in this scope.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard everything inserted in this scope.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Result of inserting a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row was written.
    Inserted,

    /// A row with the same primary or unique key already exists.
    Duplicate,

    /// Any other rejection, with the driver's message.
    Failed(String),
}
