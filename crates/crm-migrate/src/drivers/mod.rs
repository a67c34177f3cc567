//! Database driver implementations.
//!
//! - [`postgres`]: the managed PostgreSQL backend, read side
//! - [`mysql`]: MySQL/MariaDB, write side
//! - [`common`]: shared TLS helpers
//!
//! Drivers are constructed once by the caller, handed to the orchestrator as
//! trait objects, and closed once when the process is done with them.

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::SslMode;
pub use mysql::MysqlWriter;
pub use postgres::PostgresReader;
