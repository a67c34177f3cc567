//! Record and table descriptors.

use serde::{Deserialize, Serialize};

/// One source row: field name to untyped JSON value, in source column order.
///
/// Values are exactly what the source produced (arrays, objects, booleans,
/// ISO-8601 strings, numbers, nulls); conversion happens in
/// [`crate::transform`].
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A table in the migration plan.
///
/// `rank` is the table's position in the dependency order: parents always
/// carry a lower rank than the tables referencing them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name, identical in source and target.
    pub name: String,

    /// Load position; lower ranks load first.
    pub rank: u32,
}

impl TableSpec {
    /// Create a table spec.
    pub fn new(name: impl Into<String>, rank: u32) -> Self {
        Self {
            name: name.into(),
            rank,
        }
    }
}

/// Sort specs into processing order (non-decreasing rank, stable on ties).
pub fn sort_by_rank(specs: &mut [TableSpec]) {
    specs.sort_by_key(|s| s.rank);
}
