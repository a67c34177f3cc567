//! # crm-migrate
//!
//! One-shot, repeatable bulk migration of the CRM tables from the managed
//! PostgreSQL backend into MySQL.
//!
//! - **Ranked table plan** derived from the declared foreign-key graph
//! - **Offset-paginated extraction** that can restart from any page
//! - **Shape-based value conversion** from untyped JSON to MySQL values
//! - **Idempotent loads**: one transaction per table, duplicate keys skipped
//! - **Row-count reconciliation** after every run
//! - **JSON staging** so extraction and loading can run separately
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use crm_migrate::{Config, MysqlWriter, Orchestrator, PostgresReader, TableCatalog};
//!
//! #[tokio::main]
//! async fn main() -> crm_migrate::Result<()> {
//!     let config = Config::from_env()?;
//!     let source = Arc::new(PostgresReader::new(config.require_source()?).await?);
//!     let target = Arc::new(MysqlWriter::new(config.require_target()?).await?);
//!
//!     let plan = TableCatalog::builtin().plan()?;
//!     let run = Orchestrator::new(source, target, &config.migration)
//!         .run(&plan)
//!         .await;
//!     println!("Migrated {} records", run.total_records());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod extract;
pub mod load;
pub mod orchestrator;
pub mod staging;
pub mod transform;
pub mod verify;

// Re-exports for convenient access
pub use catalog::TableCatalog;
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use core::{InsertOutcome, Record, SourceReader, TableSpec, TargetTransaction, TargetWriter};
pub use drivers::{MysqlWriter, PostgresReader};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationRun, Orchestrator, RunLog, RunPhase, TableRun, TableStatus};
pub use staging::{ExportMetadata, Exporter, StagingStore};
pub use verify::{ReconciliationResult, Verifier};
