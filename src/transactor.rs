//! Units of work.
//!
//! A `Transactor` bundles the work to run inside a transaction with a name for
//! diagnostics and optional hooks the retry engine calls as the work fails,
//! commits, or ends in doubt. The work may run several times under retry, so it
//! must not cause side effects outside the transaction it is given.

use crate::error::TxResult;
use crate::models::{IsolationLevel, TransactionKind};
use crate::transaction::Transaction;

/// Work to be performed inside a transaction.
pub trait Transactor {
    /// Value produced by a successful run.
    type Output;

    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Kind of transaction to run in.
    fn kind(&self) -> TransactionKind {
        TransactionKind::Work
    }

    /// Requested isolation level. Robust transactions always run serializable.
    fn isolation(&self) -> IsolationLevel {
        IsolationLevel::Default
    }

    /// Perform the work.
    fn run(&mut self, tx: &mut Transaction<'_>) -> TxResult<Self::Output>;

    /// Called once per failed attempt, after the transaction was rolled back.
    fn on_abort(&mut self, _reason: &str) {}

    /// Called once after a successful commit.
    fn on_commit(&mut self) {}

    /// Called after `on_abort` when the commit outcome is unknown.
    fn on_doubt(&mut self) {}
}

fn ignore_abort(_reason: &str) {}

/// `Transactor` assembled from closures.
pub struct FnTransactor<F, A = fn(&str)> {
    name: String,
    kind: TransactionKind,
    isolation: IsolationLevel,
    body: F,
    abort_hook: A,
}

/// Build a `Transactor` from a name and a closure.
///
/// ```no_run
/// use db_transactor::{Connection, transactor};
/// # fn demo(conn: &mut Connection) -> db_transactor::TxResult<()> {
/// let mut insert = transactor("insert event", |tx| {
///     tx.exec("INSERT INTO events (year, note) VALUES (1977, 'yawn')")?;
///     Ok(())
/// })
/// .robust();
/// conn.perform(&mut insert)?;
/// # Ok(())
/// # }
/// ```
pub fn transactor<F, R>(name: impl Into<String>, body: F) -> FnTransactor<F>
where
    F: FnMut(&mut Transaction<'_>) -> TxResult<R>,
{
    FnTransactor {
        name: name.into(),
        kind: TransactionKind::Work,
        isolation: IsolationLevel::Default,
        body,
        abort_hook: ignore_abort as fn(&str),
    }
}

impl<F, A> FnTransactor<F, A> {
    /// Run in a robust (serializable, retried) transaction.
    pub fn robust(self) -> Self {
        self.kind(TransactionKind::Robust)
    }

    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Install a hook called with the failure reason of every failed attempt.
    pub fn on_abort<H>(self, hook: H) -> FnTransactor<F, H>
    where
        H: FnMut(&str),
    {
        FnTransactor {
            name: self.name,
            kind: self.kind,
            isolation: self.isolation,
            body: self.body,
            abort_hook: hook,
        }
    }
}

impl<F, A, R> Transactor for FnTransactor<F, A>
where
    F: FnMut(&mut Transaction<'_>) -> TxResult<R>,
    A: FnMut(&str),
{
    type Output = R;

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransactionKind {
        self.kind
    }

    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn run(&mut self, tx: &mut Transaction<'_>) -> TxResult<R> {
        (self.body)(tx)
    }

    fn on_abort(&mut self, reason: &str) {
        (self.abort_hook)(reason)
    }
}

impl<F, A> std::fmt::Debug for FnTransactor<F, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransactor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("isolation", &self.isolation)
            .finish()
    }
}
