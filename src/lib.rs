//! Transaction execution core.
//!
//! This library runs units of work inside database transactions (SQLite,
//! PostgreSQL, MySQL) with consistent commit/abort semantics. Robust
//! transactions are retried across connection loss and serialization
//! conflicts, and every connection carries a chain of scoped error handlers
//! that nested code can use to silence or capture diagnostics.

pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod error_handler;
pub mod models;
pub mod retry;
pub mod transaction;
pub mod transactor;

pub use config::{Config, ConnectionOptions};
pub use connection::Connection;
pub use db::{Row, StatementExecutor};
pub use error::{FailureClass, TxError, TxResult};
pub use error_handler::{ErrorChain, ErrorHandler, ErrorHandlerGuard, QuietErrorHandler};
pub use models::{ConnectionConfig, DatabaseType, IsolationLevel, TransactionKind, TransactionState};
pub use retry::RetryPolicy;
pub use transaction::Transaction;
pub use transactor::{FnTransactor, Transactor, transactor};
