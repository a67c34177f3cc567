//! PostgreSQL source driver.
//!
//! Reads pages as `row_to_json` text so field values arrive as untyped JSON,
//! the same shapes the backend's HTTP client library hands to applications.

mod reader;

pub use reader::PostgresReader;
