//! Core abstractions shared by every stage of the migration.
//!
//! - [`record`]: the untyped [`Record`] and the ranked [`TableSpec`]
//! - [`traits`]: the source/target capabilities the engine consumes
//!
//! The engine never talks to a concrete database. Drivers (`drivers/postgres`,
//! `drivers/mysql`) and the JSON staging store implement these traits, and the
//! orchestrator receives them by reference, so every stage can be exercised
//! against in-memory fakes.

pub mod record;
pub mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use record::{sort_by_rank, Record, TableSpec};
pub use traits::{InsertOutcome, SourceReader, TargetTransaction, TargetWriter};
