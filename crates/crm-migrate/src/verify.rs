//! Post-load row-count reconciliation.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{SourceReader, TargetWriter};

/// Source and target row counts for one table.
///
/// A mismatch is information for the operator, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub table: String,
    pub source_count: i64,
    pub target_count: i64,
    pub matches: bool,

    /// Why a count could not be taken, if it couldn't.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Compares row counts between source and target.
pub struct Verifier<'a> {
    source: &'a dyn SourceReader,
    target: &'a dyn TargetWriter,
}

impl<'a> Verifier<'a> {
    pub fn new(source: &'a dyn SourceReader, target: &'a dyn TargetWriter) -> Self {
        Self { source, target }
    }

    /// Count both sides independently and compare.
    ///
    /// A table absent from the source counts as zero rows. A count that
    /// fails is reported through `error` with `matches = false`.
    pub async fn verify(&self, table: &str) -> ReconciliationResult {
        let mut errors = Vec::new();

        let source_count = match self.source_count(table).await {
            Ok(n) => n,
            Err(e) => {
                errors.push(format!("source count: {}", e));
                0
            }
        };

        let target_count = match self.target.row_count(table).await {
            Ok(n) => n,
            Err(e) => {
                errors.push(format!("target count: {}", e));
                0
            }
        };

        let error = (!errors.is_empty()).then(|| errors.join("; "));
        let matches = error.is_none() && source_count == target_count;

        if matches {
            info!("{}: {} rows (match)", table, source_count);
        } else {
            warn!(
                "{}: source={} target={} (MISMATCH){}",
                table,
                source_count,
                target_count,
                error.as_deref().map(|e| format!(" - {}", e)).unwrap_or_default()
            );
        }

        ReconciliationResult {
            table: table.to_string(),
            source_count,
            target_count,
            matches,
            error,
        }
    }

    async fn source_count(&self, table: &str) -> crate::error::Result<i64> {
        if !self.source.table_exists(table).await? {
            return Ok(0);
        }
        self.source.row_count(table).await
    }
}
