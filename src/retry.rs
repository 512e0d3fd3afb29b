//! Retry engine.
//!
//! `perform` runs a `Transactor` until it commits or the attempt budget runs
//! out. Each attempt gets a fresh transaction. A failed attempt is rolled back
//! first, then reported to the connection's error chain, then passed to the
//! transactor's `on_abort` hook, and only then is the retry decision made.
//!
//! Only robust transactors are retried, and only for failures raised by the
//! store or the link to it. Failures raised by the unit of work itself are
//! propagated immediately. A commit whose outcome is unknown is never retried;
//! the transactor's `on_doubt` hook runs right after `on_abort`.
//!
//! All retryable failures draw from one attempt counter.

use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::connection::Connection;
use crate::error::{FailureClass, TxError, TxResult};
use crate::models::TransactionKind;
use crate::transaction::Transaction;
use crate::transactor::Transactor;
use tracing::{debug, error, warn};

/// Attempt budget for `perform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Effective number of attempts; a budget of 0 still runs once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether a failure of a `kind` transaction may be run again.
    pub fn is_retryable(kind: TransactionKind, err: &TxError) -> bool {
        kind.is_retrying()
            && matches!(err.class(), FailureClass::Connection | FailureClass::Statement)
    }
}

/// Run `transactor` on `conn` under `policy`.
pub fn perform<T>(conn: &mut Connection, transactor: &mut T, policy: RetryPolicy) -> TxResult<T::Output>
where
    T: Transactor + ?Sized,
{
    let max_attempts = policy.attempts();
    let kind = transactor.kind();
    let isolation = transactor.isolation();
    let mut attempt = 1;

    loop {
        let mut tx = Transaction::new(conn, transactor.name(), kind, isolation);
        debug!(
            connection_id = %tx.conn().id(),
            transactor = %transactor.name(),
            attempt = attempt,
            max_attempts = max_attempts,
            "Starting attempt"
        );

        let err = match run_attempt(&mut tx, transactor) {
            Ok(output) => {
                drop(tx);
                transactor.on_commit();
                return Ok(output);
            }
            Err(err) => err,
        };

        tx.abort();
        drop(tx);

        let reason = err.to_string();
        conn.process_notice(&format!(
            "Transactor '{}' failed (attempt {}/{}): {}",
            transactor.name(),
            attempt,
            max_attempts,
            reason
        ));

        transactor.on_abort(&reason);

        if err.class() == FailureClass::AmbiguousCommit {
            error!(
                connection_id = %conn.id(),
                transactor = %transactor.name(),
                "Commit outcome unknown; not retrying"
            );
            transactor.on_doubt();
            return Err(err);
        }

        if !RetryPolicy::is_retryable(kind, &err) || attempt >= max_attempts {
            return Err(err);
        }

        warn!(
            connection_id = %conn.id(),
            transactor = %transactor.name(),
            attempt = attempt,
            max_attempts = max_attempts,
            serialization_failure = err.is_serialization_failure(),
            error = %err,
            "Retrying transactor"
        );
        attempt += 1;
    }
}

fn run_attempt<T>(tx: &mut Transaction<'_>, transactor: &mut T) -> TxResult<T::Output>
where
    T: Transactor + ?Sized,
{
    tx.begin()?;
    let output = transactor.run(tx)?;
    tx.commit()?;
    Ok(output)
}
