//! MySQL/MariaDB target writer implementation.
//!
//! Implements [`TargetWriter`] with mysql_async. Each table load runs on one
//! pooled connection inside one transaction; `FOREIGN_KEY_CHECKS` is a
//! session variable, so toggling it inside that transaction affects only the
//! load that asked for it.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Transaction, TxOpts};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::core::{InsertOutcome, Record, TargetTransaction, TargetWriter};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Duplicate-key error codes: ER_DUP_ENTRY and ER_DUP_ENTRY_WITH_KEY_NAME.
const DUPLICATE_KEY_CODES: [u16; 2] = [1062, 1586];

/// One load transaction plus a count query at most.
const TARGET_POOL_SIZE: usize = 2;

/// MySQL target writer using mysql_async.
pub struct MysqlWriter {
    pool: Pool,
}

impl MysqlWriter {
    /// Create a new MySQL writer and check that it can connect.
    pub async fn new(config: &TargetConfig) -> Result<Self> {
        let endpoint = format!("{}:{}/{}", config.host, config.port, config.database);
        let ssl_mode = SslMode::parse(&config.ssl_mode)?;

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_mode.mysql_ssl_opts() {
            builder = builder.ssl_opts(ssl);
        }

        let constraints = PoolConstraints::new(1, TARGET_POOL_SIZE)
            .ok_or_else(|| MigrateError::pool("invalid constraints", "creating MySQL target pool"))?;
        let opts: Opts = builder
            .pool_opts(PoolOpts::new().with_constraints(constraints))
            .into();
        let pool = Pool::new(opts);

        // Test connection
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::connection(&endpoint, e))?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(&endpoint, e))?;
        drop(conn);

        info!("Connected to MySQL target: {}", endpoint);

        Ok(Self { pool })
    }
}

#[async_trait]
impl TargetWriter for MysqlWriter {
    async fn begin(&self, table: &str) -> Result<Box<dyn TargetTransaction>> {
        let tx = self
            .pool
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| MigrateError::load(table, format!("begin transaction: {}", e)))?;
        debug!("{}: transaction started", table);
        Ok(Box::new(MysqlTransaction { tx }))
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "getting connection for row_count"))?;
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let count: Option<i64> = conn.query_first(sql.as_str()).await?;
        Ok(count.unwrap_or(0))
    }

    fn db_type(&self) -> &str {
        "mysql"
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            debug!("MySQL pool disconnect: {}", e);
        }
    }
}

/// A table load's transaction on a dedicated pooled connection.
struct MysqlTransaction {
    tx: Transaction<'static>,
}

#[async_trait]
impl TargetTransaction for MysqlTransaction {
    async fn set_foreign_key_checks(&mut self, enabled: bool) -> Result<()> {
        let sql = format!("SET FOREIGN_KEY_CHECKS = {}", u8::from(enabled));
        self.tx.query_drop(sql.as_str()).await?;
        Ok(())
    }

    async fn insert(&mut self, table: &str, record: &Record) -> InsertOutcome {
        let sql = build_insert_sql(table, record);
        let params: Vec<mysql_async::Value> = record.values().map(json_to_mysql).collect();

        match self.tx.exec_drop(sql.as_str(), Params::from(params)).await {
            Ok(()) => InsertOutcome::Inserted,
            Err(e) if is_duplicate(&e) => InsertOutcome::Duplicate,
            Err(e) => InsertOutcome::Failed(e.to_string()),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Quote a MySQL identifier.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Single-row INSERT naming exactly the record's own columns.
fn build_insert_sql(table: &str, record: &Record) -> String {
    let columns: Vec<String> = record.keys().map(|k| quote_ident(k)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders
    )
}

fn is_duplicate(err: &mysql_async::Error) -> bool {
    matches!(err, mysql_async::Error::Server(server) if DUPLICATE_KEY_CODES.contains(&server.code))
}

/// Bind a transformed field value.
fn json_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                mysql_async::Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                mysql_async::Value::UInt(u)
            } else {
                mysql_async::Value::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => mysql_async::Value::from(s.as_str()),
        nested => mysql_async::Value::from(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("leads"), "`leads`");
        assert_eq!(quote_ident("odd`name"), "`odd``name`");
    }

    #[test]
    fn test_build_insert_sql_uses_record_columns() {
        let sql = build_insert_sql("leads", &record(json!({"id": 1, "name": "A", "branch_id": 3})));
        assert_eq!(
            sql,
            "INSERT INTO `leads` (`id`, `name`, `branch_id`) VALUES (?, ?, ?)"
        );
    }

    #[test]
    fn test_build_insert_sql_empty_record() {
        assert_eq!(
            build_insert_sql("notes", &Record::new()),
            "INSERT INTO `notes` () VALUES ()"
        );
    }

    #[test]
    fn test_is_duplicate() {
        let dup = mysql_async::Error::Server(mysql_async::ServerError {
            code: 1062,
            message: "Duplicate entry '1' for key 'PRIMARY'".into(),
            state: "23000".into(),
        });
        let fk = mysql_async::Error::Server(mysql_async::ServerError {
            code: 1452,
            message: "Cannot add or update a child row".into(),
            state: "23000".into(),
        });
        assert!(is_duplicate(&dup));
        assert!(!is_duplicate(&fk));
    }

    #[test]
    fn test_json_to_mysql() {
        assert_eq!(json_to_mysql(&Value::Null), mysql_async::Value::NULL);
        assert_eq!(json_to_mysql(&json!(42)), mysql_async::Value::Int(42));
        assert_eq!(json_to_mysql(&json!(1.5)), mysql_async::Value::Double(1.5));
        assert_eq!(
            json_to_mysql(&json!("2024-01-15 10:30:00")),
            mysql_async::Value::Bytes(b"2024-01-15 10:30:00".to_vec())
        );
        assert_eq!(
            json_to_mysql(&json!({"a": 1})),
            mysql_async::Value::Bytes(br#"{"a":1}"#.to_vec())
        );
    }
}
