//! PostgreSQL source reader implementation.
//!
//! Implements [`SourceReader`] against the managed backend's database. Every
//! row is fetched as `row_to_json(t)::text`, so column types never need to be
//! known up front and records keep their column order.

use std::str::FromStr;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use serde_json::Value;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info};

use crate::config::{redact_url, SourceConfig};
use crate::core::{Record, SourceReader};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Pages are read one at a time, so a small pool is enough.
const SOURCE_POOL_SIZE: usize = 2;

/// PostgreSQL source reader implementation.
pub struct PostgresReader {
    pool: Pool,
    schema: String,
}

impl PostgresReader {
    /// Create a new PostgreSQL reader and check that it can connect.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let endpoint = redact_url(&config.url);
        let mut pg_config = PgConfig::from_str(&config.url)
            .map_err(|e| MigrateError::Config(format!("invalid source URL {}: {}", endpoint, e)))?;
        if let Some(key) = &config.key {
            pg_config.password(key);
        }

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let mgr = match ssl_mode.postgres_connector()? {
            None => Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config),
            Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        };
        let pool = Pool::builder(mgr)
            .max_size(SOURCE_POOL_SIZE)
            .build()
            .map_err(|e| MigrateError::pool(e, "creating PostgreSQL source pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(&endpoint, e))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(&endpoint, e))?;

        info!(
            "Connected to PostgreSQL source: {} (schema {})",
            endpoint, config.schema
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }

    fn table_ref(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }
}

#[async_trait]
impl SourceReader for PostgresReader {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let client = self.client("getting connection for table_exists").await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&self.schema, &table],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn read_page(&self, table: &str, offset: u64, limit: usize) -> Result<Vec<Record>> {
        let client = self.client("getting connection for read_page").await?;
        let sql = page_query(&self.table_ref(table));
        let rows = client
            .query(sql.as_str(), &[&(offset as i64), &(limit as i64)])
            .await
            .map_err(|e| MigrateError::source_read(table, e))?;

        debug!("{}: fetched {} rows at offset {}", table, rows.len(), offset);

        rows.iter()
            .map(|row| parse_row(table, &row.get::<_, String>(0)))
            .collect()
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let client = self.client("getting connection for row_count").await?;
        let sql = format!("SELECT COUNT(*)::int8 FROM {}", self.table_ref(table));
        let row = client.query_one(sql.as_str(), &[]).await?;
        Ok(row.get(0))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Page query over a quoted table reference, in the engine's natural order.
fn page_query(table_ref: &str) -> String {
    format!(
        "SELECT row_to_json(t)::text FROM {} t OFFSET $1 LIMIT $2",
        table_ref
    )
}

fn parse_row(table: &str, text: &str) -> Result<Record> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MigrateError::source_read(
            table,
            format!("row is not a JSON object: {}", other),
        )),
        Err(e) => Err(MigrateError::source_read(table, e)),
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
