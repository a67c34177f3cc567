//! Utilities shared across database drivers.
//!
//! - [`tls`]: `ssl_mode` parsing and TLS setup for both drivers

pub mod tls;

pub use tls::SslMode;
