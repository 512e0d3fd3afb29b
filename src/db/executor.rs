//! Statement execution.
//!
//! This module defines the `StatementExecutor` contract transactions run their
//! statements through, and `SqlxExecutor`, its implementation on top of a single
//! dedicated sqlx connection.
//!
//! # Architecture
//!
//! The public API of this crate is synchronous: a unit of work blocks the calling
//! thread until it commits or fails. `SqlxExecutor` owns a current-thread tokio
//! runtime and drives each async sqlx call to completion with `block_on`. Do not
//! call it from inside another tokio runtime.
//!
//! Statements are sent with `sqlx::raw_sql` (simple query protocol), which accepts
//! transaction control statements and DDL on every backend.

use crate::db::dialect;
use crate::db::types::{IntoRow, Row};
use crate::error::{TxError, TxResult};
use crate::models::{ConnectionConfig, DatabaseType};
use sqlx::{Connection as _, MySqlConnection, PgConnection, SqliteConnection};
use std::time::Instant;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// Contract between a transaction and the store.
///
/// Implementations must report a lost link as a `TxError::Connection` and a
/// statement the store rejected as a `TxError::Statement`; the retry engine
/// decides on that distinction.
pub trait StatementExecutor: Send {
    /// Backend dialect.
    fn database_type(&self) -> DatabaseType;

    /// Whether the link to the store is believed usable.
    fn is_open(&self) -> bool;

    /// Drop the current link (if any) and establish a new one.
    fn reconnect(&mut self) -> TxResult<()>;

    /// Execute a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str) -> TxResult<u64>;

    /// Execute a statement and return the rows it produced.
    fn query(&mut self, sql: &str) -> TxResult<Vec<Row>>;

    /// Escape text for use inside a single-quoted literal.
    fn escape(&self, text: &str) -> String {
        dialect::escape_literal(self.database_type(), text)
    }

    /// Close the link.
    fn close(&mut self);
}

/// Backend-specific connection (avoids AnyConnection limitations).
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// `StatementExecutor` over a dedicated sqlx connection.
pub struct SqlxExecutor {
    runtime: Runtime,
    connection: Option<DbConnection>,
    config: ConnectionConfig,
}

impl SqlxExecutor {
    /// Connect to the database described by `config`.
    pub fn connect(config: ConnectionConfig) -> TxResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TxError::internal(format!("Failed to start I/O runtime: {}", e)))?;

        let mut executor = Self {
            runtime,
            connection: None,
            config,
        };
        executor.reconnect()?;
        Ok(executor)
    }

    /// Connection configuration this executor was created from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn open(&self) -> TxResult<DbConnection> {
        let url = self.config.connection_string.as_str();
        let timeout = self.config.options.connect_timeout_duration();
        let db_type = self.config.db_type;

        self.runtime.block_on(async {
            let connect = async {
                match db_type {
                    DatabaseType::MySQL => MySqlConnection::connect(url).await.map(DbConnection::MySql),
                    DatabaseType::PostgreSQL => {
                        PgConnection::connect(url).await.map(DbConnection::Postgres)
                    }
                    DatabaseType::SQLite => {
                        SqliteConnection::connect(url).await.map(DbConnection::SQLite)
                    }
                }
            };
            match tokio::time::timeout(timeout, connect).await {
                Ok(result) => result.map_err(TxError::from),
                Err(_) => Err(TxError::connection(
                    format!("Connection attempt timed out after {}s", timeout.as_secs()),
                    "Check database server availability or raise connect_timeout",
                )),
            }
        })
    }

    /// Record the outcome of a call; a lost link closes the executor.
    fn track<T>(&mut self, result: TxResult<T>) -> TxResult<T> {
        if let Err(err) = &result {
            if err.is_connection() {
                warn!(
                    connection_id = %self.config.id,
                    error = %err,
                    "Connection lost"
                );
                self.connection = None;
            }
        }
        result
    }

    fn closed_error() -> TxError {
        TxError::connection(
            "Connection is closed",
            "Begin a new transaction to reconnect",
        )
    }
}

impl StatementExecutor for SqlxExecutor {
    fn database_type(&self) -> DatabaseType {
        self.config.db_type
    }

    fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn reconnect(&mut self) -> TxResult<()> {
        self.close();

        info!(
            connection_id = %self.config.id,
            db_type = %self.config.db_type,
            url = %self.config.masked_connection_string(),
            "Connecting to database"
        );

        let connection = self.open()?;
        debug_assert_eq!(connection.db_type(), self.config.db_type);
        self.connection = Some(connection);
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> TxResult<u64> {
        let start = Instant::now();
        let conn = self.connection.as_mut().ok_or_else(Self::closed_error)?;

        let result = self.runtime.block_on(async {
            impl_db_dispatch!(conn, {
                MySql(c) => sqlx::raw_sql(sql).execute(&mut *c).await.map(|r| r.rows_affected()),
                Postgres(c) => sqlx::raw_sql(sql).execute(&mut *c).await.map(|r| r.rows_affected()),
                SQLite(c) => sqlx::raw_sql(sql).execute(&mut *c).await.map(|r| r.rows_affected()),
            })
        });

        let rows_affected = self.track(result.map_err(TxError::from))?;
        debug!(
            connection_id = %self.config.id,
            sql = %sql,
            rows_affected = rows_affected,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed statement"
        );
        Ok(rows_affected)
    }

    fn query(&mut self, sql: &str) -> TxResult<Vec<Row>> {
        let start = Instant::now();
        let conn = self.connection.as_mut().ok_or_else(Self::closed_error)?;

        let result = self.runtime.block_on(async {
            impl_db_dispatch!(conn, {
                MySql(c) => sqlx::raw_sql(sql)
                    .fetch_all(&mut *c)
                    .await
                    .map(|rows| rows.iter().map(IntoRow::to_row).collect::<Vec<_>>()),
                Postgres(c) => sqlx::raw_sql(sql)
                    .fetch_all(&mut *c)
                    .await
                    .map(|rows| rows.iter().map(IntoRow::to_row).collect::<Vec<_>>()),
                SQLite(c) => sqlx::raw_sql(sql)
                    .fetch_all(&mut *c)
                    .await
                    .map(|rows| rows.iter().map(IntoRow::to_row).collect::<Vec<_>>()),
            })
        });

        let rows = self.track(result.map_err(TxError::from))?;
        debug!(
            connection_id = %self.config.id,
            sql = %sql,
            row_count = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Executed query"
        );
        Ok(rows)
    }

    fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            debug!(connection_id = %self.config.id, "Closing connection");
            let result = self.runtime.block_on(async {
                impl_db_dispatch!(conn, {
                    MySql(c) => c.close().await,
                    Postgres(c) => c.close().await,
                    SQLite(c) => c.close().await,
                })
            });
            // Best effort: the link may already be gone
            if let Err(e) = result {
                debug!(connection_id = %self.config.id, error = %e, "Error while closing connection");
            }
        }
    }
}

impl Drop for SqlxExecutor {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SqlxExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxExecutor")
            .field("connection_id", &self.config.id)
            .field("db_type", &self.config.db_type)
            .field("open", &self.connection.is_some())
            .finish()
    }
}
