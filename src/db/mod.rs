//! Statement execution layer.
//!
//! This module provides the seam between transactions and the store:
//! - The `StatementExecutor` trait consumed by transactions
//! - A sqlx-backed executor for MySQL, PostgreSQL and SQLite
//! - Row decoding into JSON values
//! - Dialect-specific control statements and literal escaping
//! - Backend dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod dialect;
pub mod executor;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use dialect::{begin_statements, escape_literal, quote_literal};
pub use executor::{DbConnection, SqlxExecutor, StatementExecutor};
pub use types::Row;
