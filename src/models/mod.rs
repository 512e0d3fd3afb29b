//! Data models for the transactor.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod transaction;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionConfigError, DatabaseType};
pub use transaction::{IsolationLevel, TransactionInfo, TransactionKind, TransactionState};
