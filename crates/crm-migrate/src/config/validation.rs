//! Configuration validation.

use super::{Config, ENV_SOURCE_URL, ENV_TARGET_DATABASE, ENV_TARGET_USER};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if let Some(source) = &config.source {
        if !source.url.starts_with("postgres://") && !source.url.starts_with("postgresql://") {
            return Err(MigrateError::Config(format!(
                "{} must be a postgres:// URL",
                ENV_SOURCE_URL
            )));
        }
        if source.schema.is_empty() {
            return Err(MigrateError::Config("source schema cannot be empty".into()));
        }
        SslMode::parse(&source.ssl_mode)?;
    }

    if let Some(target) = &config.target {
        if target.user.is_empty() {
            return Err(MigrateError::Config(format!("{} is required", ENV_TARGET_USER)));
        }
        if target.database.is_empty() {
            return Err(MigrateError::Config(format!(
                "{} is required",
                ENV_TARGET_DATABASE
            )));
        }
        SslMode::parse(&target.ssl_mode)?;
    }

    if config.migration.page_size == 0 {
        return Err(MigrateError::Config("page size must be at least 1".into()));
    }
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config("batch size must be at least 1".into()));
    }

    Ok(())
}
