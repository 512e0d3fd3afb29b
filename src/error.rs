//! Error types for the transactor.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! The variants mirror the failure taxonomy the retry engine classifies on: a lost
//! link, a statement the store rejected, a failure raised by the unit of work itself,
//! and a commit whose outcome is unknown.

use thiserror::Error;

/// Boxed error raised by application code inside a unit of work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TxError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Statement failed: {message}")]
    Statement {
        message: String,
        /// e.g., "40001" for a serialization failure
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Application error: {0}")]
    Application(#[source] BoxError),

    #[error(
        "Commit outcome unknown for transaction '{transaction}': {message}. The changes may or may not have been applied."
    )]
    AmbiguousCommit {
        transaction: String,
        message: String,
    },

    #[error("Expected {expected} row(s), got {actual} from query: {query}")]
    UnexpectedRows {
        expected: usize,
        actual: usize,
        query: String,
    },

    #[error("Usage error: {message}")]
    Usage { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification that drives retry eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Raised by the unit of work's own logic.
    Application,
    /// The link to the store is unusable.
    Connection,
    /// The store rejected a statement.
    Statement,
    /// The commit acknowledgement was lost.
    AmbiguousCommit,
    /// Misuse of the API or a local decoding problem.
    Usage,
}

impl TxError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a statement error with optional SQL state.
    pub fn statement(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Statement {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Wrap a failure raised by application code.
    pub fn application<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Application(err.into())
    }

    /// Create an ambiguous commit error.
    pub fn ambiguous_commit(transaction: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AmbiguousCommit {
            transaction: transaction.into(),
            message: message.into(),
        }
    }

    /// Create an unexpected row count error.
    pub fn unexpected_rows(expected: usize, actual: usize, query: impl Into<String>) -> Self {
        Self::UnexpectedRows {
            expected,
            actual,
            query: query.into(),
        }
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Statement { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the store, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Statement { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Classify this error for the retry engine.
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Application(_) => FailureClass::Application,
            Self::Connection { .. } => FailureClass::Connection,
            Self::Statement { .. } => FailureClass::Statement,
            Self::AmbiguousCommit { .. } => FailureClass::AmbiguousCommit,
            Self::UnexpectedRows { .. }
            | Self::Usage { .. }
            | Self::InvalidInput { .. }
            | Self::Internal { .. } => FailureClass::Usage,
        }
    }

    /// Check if this error means the link to the store was lost.
    pub fn is_connection(&self) -> bool {
        self.class() == FailureClass::Connection
    }

    /// Check if the store signalled a serialization conflict or deadlock.
    pub fn is_serialization_failure(&self) -> bool {
        match self.sql_state() {
            // SQLSTATE for PostgreSQL/MySQL, result codes for SQLite busy/locked
            Some(code) => matches!(code, "40001" | "40P01" | "5" | "6" | "517"),
            None => false,
        }
    }

    /// Downcast an application failure to the concrete error type the unit of work raised.
    pub fn application_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Application(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Convert sqlx errors to TxError.
impl From<sqlx::Error> for TxError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => TxError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                TxError::statement(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, constraints and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => TxError::unexpected_rows(1, 0, "<unknown>"),
            sqlx::Error::PoolTimedOut => TxError::connection(
                "Timed out acquiring a connection",
                "Check database server availability",
            ),
            sqlx::Error::PoolClosed => {
                TxError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => TxError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => TxError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => TxError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::WorkerCrashed => TxError::connection(
                "Database worker crashed",
                "Reconnect to the database",
            ),
            sqlx::Error::TypeNotFound { type_name } => {
                TxError::internal(format!("Type not found: {}", type_name))
            }
            sqlx::Error::ColumnNotFound(col) => {
                TxError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => TxError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                TxError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => TxError::internal(format!("Decode error: {}", source)),
            _ => TxError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for transactor operations.
pub type TxResult<T> = Result<T, TxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Deliberate;

    impl std::fmt::Display for Deliberate {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "deliberate failure")
        }
    }

    impl std::error::Error for Deliberate {}

    #[test]
    fn test_error_display() {
        let err = TxError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = TxError::statement(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(err.sql_state(), Some("42601"));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            TxError::connection("lost", "retry").class(),
            FailureClass::Connection
        );
        assert_eq!(
            TxError::statement("dup", None, "fix").class(),
            FailureClass::Statement
        );
        assert_eq!(
            TxError::application(Deliberate).class(),
            FailureClass::Application
        );
        assert_eq!(
            TxError::ambiguous_commit("tx", "lost").class(),
            FailureClass::AmbiguousCommit
        );
        assert_eq!(
            TxError::unexpected_rows(1, 0, "SELECT 1").class(),
            FailureClass::Usage
        );
        assert_eq!(TxError::usage("closed").class(), FailureClass::Usage);
    }

    #[test]
    fn test_ambiguous_commit_is_not_a_connection_error() {
        let err = TxError::ambiguous_commit("tx_1", "connection reset");
        assert!(!err.is_connection());
        assert!(err.to_string().contains("tx_1"));
    }

    #[test]
    fn test_serialization_failure_detection() {
        let pg = TxError::statement("could not serialize", Some("40001".to_string()), "retry");
        let deadlock = TxError::statement("deadlock", Some("40P01".to_string()), "retry");
        let busy = TxError::statement("database is locked", Some("5".to_string()), "retry");
        let syntax = TxError::statement("syntax", Some("42601".to_string()), "fix");
        assert!(pg.is_serialization_failure());
        assert!(deadlock.is_serialization_failure());
        assert!(busy.is_serialization_failure());
        assert!(!syntax.is_serialization_failure());
        assert!(!TxError::connection("lost", "retry").is_serialization_failure());
    }

    #[test]
    fn test_application_downcast() {
        let err = TxError::application(Deliberate);
        assert!(err.application_ref::<Deliberate>().is_some());
        assert!(err.application_ref::<std::fmt::Error>().is_none());
        assert!(err.to_string().contains("deliberate failure"));
    }

    #[test]
    fn test_application_from_string() {
        let err = TxError::application("plain message");
        assert_eq!(err.class(), FailureClass::Application);
        assert!(err.to_string().contains("plain message"));
    }

    #[test]
    fn test_sqlx_io_error_maps_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: TxError = sqlx::Error::Io(io).into();
        assert!(err.is_connection());
    }

    #[test]
    fn test_sqlx_protocol_error_maps_to_connection() {
        let err: TxError = sqlx::Error::Protocol("bad packet".to_string()).into();
        assert!(err.is_connection());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_unexpected_rows() {
        let err: TxError = sqlx::Error::RowNotFound.into();
        assert!(matches!(
            err,
            TxError::UnexpectedRows {
                expected: 1,
                actual: 0,
                ..
            }
        ));
    }
}
