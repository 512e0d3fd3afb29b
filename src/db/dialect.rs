//! Dialect-specific SQL text.
//!
//! Transaction control statements, literal escaping and the statements that
//! maintain the robust-transaction commit log.

use crate::models::{DatabaseType, IsolationLevel};

pub const COMMIT: &str = "COMMIT";
pub const ROLLBACK: &str = "ROLLBACK";

/// Statements that open a transaction at the given isolation level.
pub fn begin_statements(db: DatabaseType, isolation: IsolationLevel) -> &'static [&'static str] {
    match (db, isolation) {
        (DatabaseType::PostgreSQL, IsolationLevel::Default) => &["BEGIN"],
        (DatabaseType::PostgreSQL, IsolationLevel::Serializable) => {
            &["BEGIN ISOLATION LEVEL SERIALIZABLE"]
        }
        (DatabaseType::MySQL, IsolationLevel::Default) => &["START TRANSACTION"],
        // Applies to the next transaction only
        (DatabaseType::MySQL, IsolationLevel::Serializable) => &[
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            "START TRANSACTION",
        ],
        (DatabaseType::SQLite, IsolationLevel::Default) => &["BEGIN"],
        (DatabaseType::SQLite, IsolationLevel::Serializable) => &["BEGIN IMMEDIATE"],
    }
}

/// Escape text for use inside a single-quoted SQL string literal.
pub fn escape_literal(db: DatabaseType, text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => escaped.push_str("''"),
            '\\' if db.backslash_escapes() => escaped.push_str("\\\\"),
            '\0' => {}
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape and wrap text in single quotes.
pub fn quote_literal(db: DatabaseType, text: &str) -> String {
    format!("'{}'", escape_literal(db, text))
}

/// DDL for the commit log; `table` must already be validated as a plain identifier.
pub fn create_log_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id VARCHAR(64) PRIMARY KEY, \
         name TEXT NOT NULL, \
         started_at VARCHAR(64) NOT NULL, \
         session_id BIGINT)"
    )
}

pub fn insert_log_record(
    db: DatabaseType,
    table: &str,
    id: &str,
    name: &str,
    started_at: &str,
    session: Option<i64>,
) -> String {
    format!(
        "INSERT INTO {table} (id, name, started_at, session_id) VALUES ({}, {}, {}, {})",
        quote_literal(db, id),
        quote_literal(db, name),
        quote_literal(db, started_at),
        session.map_or_else(|| "NULL".to_string(), |s| s.to_string())
    )
}

/// Query returning the server-side id of the current session.
///
/// SQLite runs in-process and has no sessions to outlive a lost link.
pub fn session_id_query(db: DatabaseType) -> Option<&'static str> {
    match db {
        DatabaseType::PostgreSQL => Some("SELECT pg_backend_pid() AS session_id"),
        DatabaseType::MySQL => Some("SELECT CONNECTION_ID() AS session_id"),
        DatabaseType::SQLite => None,
    }
}

/// Query counting live server sessions with the given id.
pub fn session_alive_query(db: DatabaseType, session: i64) -> Option<String> {
    match db {
        DatabaseType::PostgreSQL => Some(format!(
            "SELECT COUNT(*) AS n FROM pg_stat_activity WHERE pid = {session}"
        )),
        DatabaseType::MySQL => Some(format!(
            "SELECT COUNT(*) AS n FROM information_schema.PROCESSLIST WHERE ID = {session}"
        )),
        DatabaseType::SQLite => None,
    }
}

pub fn count_log_record(db: DatabaseType, table: &str, id: &str) -> String {
    format!(
        "SELECT COUNT(*) AS n FROM {table} WHERE id = {}",
        quote_literal(db, id)
    )
}

pub fn delete_log_record(db: DatabaseType, table: &str, id: &str) -> String {
    format!("DELETE FROM {table} WHERE id = {}", quote_literal(db, id))
}
