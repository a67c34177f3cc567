//! Error types for the migration library.
//!
//! Row-level insert problems are not errors: they surface as
//! [`InsertOutcome`](crate::core::InsertOutcome) values so the loader can
//! count them and keep going. Everything here is either fatal to one table
//! (the orchestrator records it and moves on) or fatal to the whole run.

use thiserror::Error;

/// Exit code for configuration errors (missing credentials, bad values).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection failures against source or target.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code for a source read failure that escaped a table scope.
pub const EXIT_SOURCE_READ_ERROR: u8 = 3;
/// Exit code for a load failure that escaped a table scope.
pub const EXIT_LOAD_ERROR: u8 = 4;
/// Exit code for staging directory problems.
pub const EXIT_STAGING_ERROR: u8 = 5;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for JSON (de)serialization errors.
pub const EXIT_JSON_ERROR: u8 = 8;
/// Exit code used when the run was interrupted.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (missing environment variables, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source or target cannot be reached at all.
    #[error("Cannot connect to {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    /// A page read failed while extracting a table.
    #[error("Read failed for table {table}: {message}")]
    SourceRead { table: String, message: String },

    /// Opening, committing, or toggling constraints on a table load failed.
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// Intermediate JSON files are missing or malformed.
    #[error("Staging error: {0}")]
    Staging(String),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source (PostgreSQL) driver error.
    #[error("Source database error: {0}")]
    Source(#[from] tokio_postgres::Error),

    /// Target (MySQL) driver error.
    #[error("Target database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// IO error (file operations).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error.
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a SourceRead error.
    pub fn source_read(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SourceRead {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a Load error.
    pub fn load(table: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error when it reaches the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection { .. }
            | MigrateError::Pool { .. }
            | MigrateError::Source(_)
            | MigrateError::Target(_) => EXIT_CONNECTION_ERROR,
            MigrateError::SourceRead { .. } => EXIT_SOURCE_READ_ERROR,
            MigrateError::Load { .. } => EXIT_LOAD_ERROR,
            MigrateError::Staging(_) => EXIT_STAGING_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Json(_) => EXIT_JSON_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
