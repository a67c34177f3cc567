//! Configuration loading and validation.
//!
//! Everything is read once from the process environment at startup. The CLI
//! may seed the environment from a `.env` file first; the library only sees
//! variables through a lookup function.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use std::path::PathBuf;
use std::str::FromStr;

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Sections whose anchor variable (`SOURCE_DATABASE_URL`,
    /// `TARGET_DB_HOST`) is unset are left as `None`; whether that is an error
    /// depends on the command, see [`Config::require_source`] and
    /// [`Config::require_target`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source = match var(ENV_SOURCE_URL) {
            Some(url) => Some(SourceConfig {
                url,
                key: var(ENV_SOURCE_KEY),
                schema: var(ENV_SOURCE_SCHEMA).unwrap_or_else(default_public_schema),
                ssl_mode: var(ENV_SOURCE_SSL_MODE).unwrap_or_else(default_require),
            }),
            None => None,
        };

        let target = match var(ENV_TARGET_HOST) {
            Some(host) => Some(TargetConfig {
                host,
                port: parse_var(ENV_TARGET_PORT, var(ENV_TARGET_PORT))?
                    .unwrap_or_else(default_mysql_port),
                user: var(ENV_TARGET_USER).unwrap_or_default(),
                password: var(ENV_TARGET_PASSWORD).unwrap_or_default(),
                database: var(ENV_TARGET_DATABASE).unwrap_or_default(),
                ssl_mode: var(ENV_TARGET_SSL_MODE).unwrap_or_else(default_disable),
            }),
            None => None,
        };

        let defaults = MigrationConfig::default();
        let migration = MigrationConfig {
            page_size: parse_var(ENV_PAGE_SIZE, var(ENV_PAGE_SIZE))?.unwrap_or(defaults.page_size),
            batch_size: parse_var(ENV_BATCH_SIZE, var(ENV_BATCH_SIZE))?
                .unwrap_or(defaults.batch_size),
            data_dir: var(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        };

        let config = Config {
            source,
            target,
            migration,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate whatever sections are present.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// The source section, or a configuration error naming what is missing.
    pub fn require_source(&self) -> Result<&SourceConfig> {
        self.source.as_ref().ok_or_else(|| {
            MigrateError::Config(format!(
                "{} is required to read from the source database",
                ENV_SOURCE_URL
            ))
        })
    }

    /// The target section, or a configuration error naming what is missing.
    pub fn require_target(&self) -> Result<&TargetConfig> {
        self.target.as_ref().ok_or_else(|| {
            MigrateError::Config(format!(
                "{} is required to write to the target database",
                ENV_TARGET_HOST
            ))
        })
    }
}

fn parse_var<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>> {
    raw.map(|v| {
        v.trim()
            .parse::<T>()
            .map_err(|_| MigrateError::Config(format!("{} has invalid value '{}'", key, v)))
    })
    .transpose()
}
