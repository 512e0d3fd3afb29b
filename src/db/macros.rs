//! Backend dispatch macro.
//!
//! Expands one body per backend connection variant so each arm is type-checked
//! against the concrete sqlx driver. Zero runtime overhead.

/// Macro for generating backend dispatch match arms.
///
/// This macro generates match arms for `DbConnection` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(conn, {
///     MySql(c) => do_mysql(c),
///     Postgres(c) => do_postgres(c),
///     SQLite(c) => do_sqlite(c),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::executor::DbConnection::$variant($c) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
