//! Transaction lifecycle.
//!
//! A `Transaction` borrows its `Connection` mutably for its whole lifetime, so
//! the borrow checker enforces that at most one transaction is live per
//! connection. Committing or aborting makes the transaction terminal; dropping
//! it releases the connection for the next one.
//!
//! # Kinds
//!
//! - `NonTransaction` runs in autocommit mode. Nothing it does can be undone.
//! - `Work` brackets statements with BEGIN/COMMIT. If the commit
//!   acknowledgement is lost the outcome is unknown and the transaction ends
//!   up `InDoubt`.
//! - `Robust` runs serializable and writes a marker record into the
//!   connection's log table inside the transaction. When the commit
//!   acknowledgement is lost it reconnects and looks the marker up to learn
//!   whether the commit went through. On servers whose sessions can outlive
//!   the client link, a missing marker only counts once the session that sent
//!   the commit has ended.

use crate::connection::Connection;
use crate::db::dialect;
use crate::db::types::Row;
use crate::error::{TxError, TxResult};
use crate::models::{IsolationLevel, TransactionInfo, TransactionKind, TransactionState};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often to look for the session that sent a lost commit.
const SESSION_POLLS: u32 = 5;
const SESSION_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Outcome of looking up a robust transaction's marker after a lost commit.
enum CommitCheck {
    Committed,
    NotCommitted,
    Unknown(TxError),
}

/// One unit of atomic work against a connection.
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    id: String,
    name: String,
    kind: TransactionKind,
    isolation: IsolationLevel,
    state: TransactionState,
    started_at: DateTime<Utc>,
    /// Server session the transaction runs in, where the store has one.
    session: Option<i64>,
}

impl<'c> Transaction<'c> {
    /// Create an inactive transaction; call `begin` before issuing statements.
    pub fn new(
        conn: &'c mut Connection,
        name: impl Into<String>,
        kind: TransactionKind,
        isolation: IsolationLevel,
    ) -> Self {
        Self {
            conn,
            id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            kind,
            isolation: kind.effective_isolation(isolation),
            state: TransactionState::Inactive,
            started_at: Utc::now(),
            session: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The connection this transaction runs on.
    pub fn conn(&self) -> &Connection {
        &*self.conn
    }

    /// Snapshot for diagnostics.
    pub fn info(&self) -> TransactionInfo {
        TransactionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            connection_id: self.conn.id().to_string(),
            kind: self.kind,
            isolation: self.isolation,
            state: self.state,
            started_at: self.started_at,
        }
    }

    /// Open the transaction.
    ///
    /// A connection whose link was lost is re-established first. Any failure
    /// leaves the transaction `Aborted`.
    pub fn begin(&mut self) -> TxResult<()> {
        if self.state != TransactionState::Inactive {
            return Err(TxError::usage(format!(
                "Cannot begin {} '{}': it is already {}",
                self.kind, self.name, self.state
            )));
        }

        match self.open() {
            Ok(()) => {
                self.state = TransactionState::Active;
                debug!(
                    connection_id = %self.conn.id(),
                    transaction_id = %self.id,
                    name = %self.name,
                    kind = %self.kind,
                    "Transaction started"
                );
                Ok(())
            }
            Err(err) => {
                if self.kind.is_bracketed() && self.conn.executor_mut().is_open() {
                    if let Err(e) = self.conn.executor_mut().execute(dialect::ROLLBACK) {
                        debug!(connection_id = %self.conn.id(), error = %e, "Rollback after failed begin");
                    }
                }
                self.state = TransactionState::Aborted;
                Err(err)
            }
        }
    }

    fn open(&mut self) -> TxResult<()> {
        if !self.conn.executor_mut().is_open() {
            info!(connection_id = %self.conn.id(), "Reactivating connection");
            self.conn.executor_mut().reconnect()?;
        }

        if !self.kind.is_bracketed() {
            return Ok(());
        }

        let db_type = self.conn.database_type();
        if self.kind == TransactionKind::Robust {
            self.conn.ensure_log_table()?;
            self.session = match dialect::session_id_query(db_type) {
                Some(sql) => Some(self.query_integer(sql)?),
                None => None,
            };
        }

        for stmt in dialect::begin_statements(db_type, self.isolation) {
            self.conn.executor_mut().execute(stmt)?;
        }

        if self.kind == TransactionKind::Robust {
            let sql = dialect::insert_log_record(
                db_type,
                self.conn.log_table(),
                &self.id,
                &self.name,
                &self.started_at.to_rfc3339(),
                self.session,
            );
            self.conn.executor_mut().execute(&sql)?;
        }
        Ok(())
    }

    fn ensure_active(&self) -> TxResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(TxError::usage(format!(
                "{} '{}' is {}, not active",
                self.kind, self.name, self.state
            )))
        }
    }

    /// Execute a statement and return the number of affected rows.
    pub fn exec(&mut self, sql: &str) -> TxResult<u64> {
        self.ensure_active()?;
        self.conn.executor_mut().execute(sql)
    }

    /// Execute a statement and return its rows.
    pub fn query(&mut self, sql: &str) -> TxResult<Vec<Row>> {
        self.ensure_active()?;
        self.conn.executor_mut().query(sql)
    }

    /// Execute a statement that must not produce rows.
    pub fn exec0(&mut self, sql: &str) -> TxResult<()> {
        let rows = self.query(sql)?;
        if rows.is_empty() {
            Ok(())
        } else {
            Err(TxError::unexpected_rows(0, rows.len(), sql))
        }
    }

    /// Execute a statement that must produce exactly one row.
    pub fn exec1(&mut self, sql: &str) -> TxResult<Row> {
        let mut rows = self.query(sql)?;
        if rows.len() == 1 {
            Ok(rows.remove(0))
        } else {
            Err(TxError::unexpected_rows(1, rows.len(), sql))
        }
    }

    /// Escape text for a single-quoted literal.
    pub fn esc(&self, text: &str) -> String {
        self.conn.esc(text)
    }

    /// Escape text and wrap it in single quotes.
    pub fn quote(&self, text: &str) -> String {
        self.conn.quote(text)
    }

    /// Make the transaction's changes permanent.
    pub fn commit(&mut self) -> TxResult<()> {
        match self.state {
            TransactionState::Active => {}
            TransactionState::Committed => {
                self.conn.process_notice(&format!(
                    "Attempt to commit previously committed {} '{}'",
                    self.kind, self.name
                ));
                return Ok(());
            }
            TransactionState::Aborted => {
                return Err(TxError::usage(format!(
                    "Attempt to commit previously aborted {} '{}'",
                    self.kind, self.name
                )));
            }
            TransactionState::Inactive | TransactionState::InDoubt => {
                return Err(TxError::usage(format!(
                    "Cannot commit {} '{}': it is {}",
                    self.kind, self.name, self.state
                )));
            }
        }

        if !self.kind.is_bracketed() {
            self.state = TransactionState::Committed;
            return Ok(());
        }

        match self.conn.executor_mut().execute(dialect::COMMIT) {
            Ok(_) => {
                self.committed();
                Ok(())
            }
            Err(err) if err.is_connection() => self.resolve_lost_commit(err),
            Err(err) => {
                // Some backends keep the transaction open after a refused commit
                if let Err(e) = self.conn.executor_mut().execute(dialect::ROLLBACK) {
                    debug!(connection_id = %self.conn.id(), error = %e, "Rollback after refused commit");
                }
                self.state = TransactionState::Aborted;
                warn!(
                    connection_id = %self.conn.id(),
                    transaction_id = %self.id,
                    error = %err,
                    "Commit rejected"
                );
                Err(err)
            }
        }
    }

    fn committed(&mut self) {
        self.state = TransactionState::Committed;
        info!(
            connection_id = %self.conn.id(),
            transaction_id = %self.id,
            name = %self.name,
            "Transaction committed"
        );
        if self.kind == TransactionKind::Robust {
            self.forget_marker();
        }
    }

    fn resolve_lost_commit(&mut self, cause: TxError) -> TxResult<()> {
        if self.kind != TransactionKind::Robust {
            return Err(self.in_doubt(cause));
        }

        match self.check_marker() {
            CommitCheck::Committed => {
                info!(
                    connection_id = %self.conn.id(),
                    transaction_id = %self.id,
                    "Commit confirmed after reconnect"
                );
                self.committed();
                Ok(())
            }
            CommitCheck::NotCommitted => {
                self.state = TransactionState::Aborted;
                warn!(
                    connection_id = %self.conn.id(),
                    transaction_id = %self.id,
                    "Connection lost during commit; transaction was not committed"
                );
                Err(TxError::connection(
                    format!(
                        "Connection lost while committing '{}'; the transaction was not committed ({})",
                        self.name, cause
                    ),
                    "The transaction can safely be run again",
                ))
            }
            CommitCheck::Unknown(check_err) => {
                debug!(
                    connection_id = %self.conn.id(),
                    transaction_id = %self.id,
                    error = %check_err,
                    "Could not look up commit marker"
                );
                Err(self.in_doubt(cause))
            }
        }
    }

    fn in_doubt(&mut self, cause: TxError) -> TxError {
        self.state = TransactionState::InDoubt;
        error!(
            connection_id = %self.conn.id(),
            transaction_id = %self.id,
            name = %self.name,
            error = %cause,
            "Connection lost during commit; outcome unknown"
        );
        TxError::ambiguous_commit(self.name.clone(), cause.to_string())
    }

    fn check_marker(&mut self) -> CommitCheck {
        if let Err(err) = self.conn.executor_mut().reconnect() {
            return CommitCheck::Unknown(err);
        }
        match self.count_marker() {
            Ok(0) => {}
            Ok(_) => return CommitCheck::Committed,
            Err(err) => return CommitCheck::Unknown(err),
        }

        let Some(session) = self.session else {
            return CommitCheck::NotCommitted;
        };
        match self.wait_for_session_end(session) {
            Ok(true) => {}
            Ok(false) => {
                return CommitCheck::Unknown(TxError::connection(
                    format!("Session {session} that sent the commit is still running"),
                    "Check the commit log table before running the transaction again",
                ));
            }
            Err(err) => return CommitCheck::Unknown(err),
        }

        // The session may have committed just before it ended
        match self.count_marker() {
            Ok(0) => CommitCheck::NotCommitted,
            Ok(_) => CommitCheck::Committed,
            Err(err) => CommitCheck::Unknown(err),
        }
    }

    fn count_marker(&mut self) -> TxResult<i64> {
        let sql = dialect::count_log_record(self.conn.database_type(), self.conn.log_table(), &self.id);
        self.query_integer(&sql)
    }

    /// Poll until `session` is gone; `false` if it outlived every poll.
    fn wait_for_session_end(&mut self, session: i64) -> TxResult<bool> {
        let Some(sql) = dialect::session_alive_query(self.conn.database_type(), session) else {
            return Ok(true);
        };
        for poll in 0..SESSION_POLLS {
            if poll > 0 {
                std::thread::sleep(SESSION_POLL_INTERVAL);
            }
            if self.query_integer(&sql)? == 0 {
                return Ok(true);
            }
            debug!(
                connection_id = %self.conn.id(),
                transaction_id = %self.id,
                session = session,
                poll = poll + 1,
                "Session that sent the commit is still running"
            );
        }
        Ok(false)
    }

    /// Integer in the first column of a query that must return exactly one row.
    fn query_integer(&mut self, sql: &str) -> TxResult<i64> {
        let mut rows = self.conn.executor_mut().query(sql)?;
        if rows.len() != 1 {
            return Err(TxError::unexpected_rows(1, rows.len(), sql));
        }
        rows.remove(0).try_get::<i64>(0)
    }

    /// Remove the commit marker; failures only leave a stale log row behind.
    fn forget_marker(&mut self) {
        let sql = dialect::delete_log_record(self.conn.database_type(), self.conn.log_table(), &self.id);
        if let Err(err) = self.conn.executor_mut().execute(&sql) {
            debug!(
                connection_id = %self.conn.id(),
                transaction_id = %self.id,
                error = %err,
                "Failed to delete commit marker"
            );
        }
    }

    /// Roll back the transaction. Never fails; a no-op once terminal.
    pub fn abort(&mut self) {
        match self.state {
            TransactionState::Inactive => {
                self.state = TransactionState::Aborted;
                return;
            }
            TransactionState::Active => {}
            _ => return,
        }

        self.state = TransactionState::Aborted;

        if !self.kind.is_bracketed() {
            self.conn.process_notice(&format!(
                "Aborting {} '{}': changes made so far cannot be undone",
                self.kind, self.name
            ));
            return;
        }

        let executor = self.conn.executor_mut();
        if !executor.is_open() {
            // The store discards the transaction along with the link
            debug!(
                connection_id = %self.conn.id(),
                transaction_id = %self.id,
                "Connection gone; nothing to roll back"
            );
            return;
        }

        match executor.execute(dialect::ROLLBACK) {
            Ok(_) => info!(
                connection_id = %self.conn.id(),
                transaction_id = %self.id,
                name = %self.name,
                "Transaction rolled back"
            ),
            Err(err) => {
                warn!(
                    connection_id = %self.conn.id(),
                    transaction_id = %self.id,
                    error = %err,
                    "Rollback failed"
                );
                self.conn.process_notice(&format!(
                    "Error while rolling back {} '{}': {}",
                    self.kind, self.name, err
                ));
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state.is_active() {
            self.conn.process_notice(&format!(
                "{} '{}' was never closed; aborting it",
                self.kind, self.name
            ));
            self.abort();
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("isolation", &self.isolation)
            .field("state", &self.state)
            .finish()
    }
}
