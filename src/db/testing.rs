//! In-memory executor for unit tests.
//!
//! `ScriptedExecutor` keeps just enough state to observe transactional behaviour:
//! every statement it receives, which writes are pending inside the open
//! transaction and which have been committed, and the commit-log markers written
//! by robust transactions. Faults are injected by statement prefix.

use crate::config::DEFAULT_LOG_TABLE;
use crate::db::executor::StatementExecutor;
use crate::db::types::Row;
use crate::error::{TxError, TxResult};
use crate::models::DatabaseType;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// The link drops before the statement reaches the store.
    Connection,
    /// The store rejects the statement.
    Statement,
    /// Serialization conflict reported by the store.
    Serialization,
    /// The statement takes effect, then the link drops before the reply.
    LostAfterApply,
}

struct ScriptedFault {
    prefix: String,
    fault: Fault,
    remaining: usize,
}

#[derive(Default)]
pub(crate) struct ScriptState {
    pub open: bool,
    pub in_transaction: bool,
    pub statements: Vec<String>,
    pub pending: Vec<String>,
    pub committed: Vec<String>,
    pub pending_markers: Vec<String>,
    pub committed_markers: HashSet<String>,
    pub reconnects: usize,
    pub refused_reconnects: usize,
    faults: Vec<ScriptedFault>,
    rows: HashMap<String, Vec<Row>>,
}

/// Executor with scripted faults; clones share state.
#[derive(Clone)]
pub(crate) struct ScriptedExecutor {
    state: Arc<Mutex<ScriptState>>,
    log_table: String,
    database: DatabaseType,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::with_database(DatabaseType::SQLite)
    }

    /// Executor that reports itself as `database`; only the dialect changes.
    pub fn with_database(database: DatabaseType) -> Self {
        let state = ScriptState {
            open: true,
            ..ScriptState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            log_table: DEFAULT_LOG_TABLE.to_string(),
            database,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap()
    }

    /// Fail the next `times` statements starting with `prefix`.
    pub fn fail(&self, prefix: &str, fault: Fault, times: usize) -> &Self {
        self.state().faults.push(ScriptedFault {
            prefix: prefix.to_string(),
            fault,
            remaining: times,
        });
        self
    }

    /// Make the next `times` reconnect attempts fail.
    pub fn refuse_reconnects(&self, times: usize) -> &Self {
        self.state().refused_reconnects = times;
        self
    }

    /// Rows returned by queries starting with `prefix`.
    pub fn returns(&self, prefix: &str, rows: Vec<Row>) -> &Self {
        self.state().rows.insert(prefix.to_string(), rows);
        self
    }

    /// Drop the link without telling the caller.
    pub fn sever(&self) {
        let mut state = self.state();
        state.open = false;
        state.in_transaction = false;
        state.pending.clear();
        state.pending_markers.clear();
    }

    pub fn statements(&self) -> Vec<String> {
        self.state().statements.clone()
    }

    pub fn committed(&self) -> Vec<String> {
        self.state().committed.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .statements
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }

    pub fn boxed(&self) -> Box<dyn StatementExecutor> {
        Box::new(self.clone())
    }

    fn take_fault(state: &mut ScriptState, sql: &str) -> Option<Fault> {
        let entry = state
            .faults
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.starts_with(&f.prefix))?;
        entry.remaining -= 1;
        Some(entry.fault)
    }

    fn lost(state: &mut ScriptState) -> TxError {
        state.open = false;
        state.in_transaction = false;
        state.pending.clear();
        state.pending_markers.clear();
        TxError::connection("server closed the connection unexpectedly", "Reconnect")
    }

    fn marker_id(&self, sql: &str) -> Option<String> {
        let insert = format!("INSERT INTO {} ", self.log_table);
        if !sql.starts_with(&insert) {
            return None;
        }
        let start = sql.find("VALUES ('")? + "VALUES ('".len();
        let len = sql[start..].find('\'')?;
        Some(sql[start..start + len].to_string())
    }

    fn apply(&self, state: &mut ScriptState, sql: &str) {
        let upper = sql.to_ascii_uppercase();
        if upper.starts_with("BEGIN") || upper.starts_with("START TRANSACTION") {
            state.in_transaction = true;
        } else if upper == "COMMIT" {
            let pending = std::mem::take(&mut state.pending);
            state.committed.extend(pending);
            let markers = std::mem::take(&mut state.pending_markers);
            state.committed_markers.extend(markers);
            state.in_transaction = false;
        } else if upper == "ROLLBACK" {
            state.pending.clear();
            state.pending_markers.clear();
            state.in_transaction = false;
        } else if let Some(id) = self.marker_id(sql) {
            if state.in_transaction {
                state.pending_markers.push(id);
            } else {
                state.committed_markers.insert(id);
            }
        } else if upper.starts_with(&format!("DELETE FROM {} ", self.log_table.to_ascii_uppercase())) {
            state.committed_markers.retain(|id| !sql.contains(id.as_str()));
        } else if upper.starts_with("INSERT") || upper.starts_with("UPDATE") || upper.starts_with("DELETE") {
            if state.in_transaction {
                state.pending.push(sql.to_string());
            } else {
                state.committed.push(sql.to_string());
            }
        }
    }

    fn run(&self, sql: &str) -> TxResult<()> {
        let mut state = self.state();
        state.statements.push(sql.to_string());
        if !state.open {
            return Err(TxError::connection("Connection is closed", "Reconnect"));
        }
        match Self::take_fault(&mut state, sql) {
            Some(Fault::Connection) => Err(Self::lost(&mut state)),
            Some(Fault::Statement) => Err(TxError::statement(
                "duplicate key value violates unique constraint",
                Some("23505".to_string()),
                "Fix the data",
            )),
            Some(Fault::Serialization) => Err(TxError::statement(
                "could not serialize access due to concurrent update",
                Some("40001".to_string()),
                "Retry the transaction",
            )),
            Some(Fault::LostAfterApply) => {
                self.apply(&mut state, sql);
                Err(Self::lost(&mut state))
            }
            None => {
                self.apply(&mut state, sql);
                Ok(())
            }
        }
    }
}

impl StatementExecutor for ScriptedExecutor {
    fn database_type(&self) -> DatabaseType {
        self.database
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn reconnect(&mut self) -> TxResult<()> {
        let mut state = self.state();
        state.reconnects += 1;
        if state.refused_reconnects > 0 {
            state.refused_reconnects -= 1;
            state.open = false;
            return Err(TxError::connection("connection refused", "Start the server"));
        }
        state.open = true;
        state.in_transaction = false;
        state.pending.clear();
        state.pending_markers.clear();
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> TxResult<u64> {
        self.run(sql)?;
        Ok(1)
    }

    fn query(&mut self, sql: &str) -> TxResult<Vec<Row>> {
        self.run(sql)?;

        let state = self.state();
        let count_prefix = format!("SELECT COUNT(*) AS n FROM {} ", self.log_table);
        if sql.starts_with(&count_prefix) {
            let n = state
                .committed_markers
                .iter()
                .chain(state.pending_markers.iter())
                .filter(|id| sql.contains(id.as_str()))
                .count();
            return Ok(vec![Row::new(vec!["n".to_string()], vec![json!(n)])]);
        }

        Ok(state
            .rows
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn close(&mut self) {
        let mut state = self.state();
        state.open = false;
        state.in_transaction = false;
        state.pending.clear();
        state.pending_markers.clear();
    }
}
