//! Connection to a store.
//!
//! A `Connection` owns a statement executor, the error notification chain and
//! the attempt budget for `perform`. Transactions borrow it mutably, so only one
//! can be live at a time.

use crate::config::ConnectionOptions;
use crate::db::dialect;
use crate::db::executor::{SqlxExecutor, StatementExecutor};
use crate::error::{TxError, TxResult};
use crate::error_handler::{ErrorChain, ErrorHandler, ErrorHandlerGuard};
use crate::models::{ConnectionConfig, DatabaseType, IsolationLevel, TransactionKind};
use crate::retry::{self, RetryPolicy};
use crate::transaction::Transaction;
use crate::transactor::Transactor;
use tracing::{debug, info};

pub struct Connection {
    id: String,
    executor: Box<dyn StatementExecutor>,
    errors: ErrorChain,
    policy: RetryPolicy,
    log_table: String,
    log_table_ready: bool,
}

impl Connection {
    /// Connect to the database described by `config`.
    pub fn open(config: ConnectionConfig) -> TxResult<Self> {
        let id = config.id.clone();
        let options = config.options.clone();
        let executor = SqlxExecutor::connect(config)?;
        Self::with_executor(id, Box::new(executor), &options)
    }

    /// Wrap an existing executor.
    pub fn with_executor(
        id: impl Into<String>,
        executor: Box<dyn StatementExecutor>,
        options: &ConnectionOptions,
    ) -> TxResult<Self> {
        options.validate().map_err(TxError::invalid_input)?;
        let id = id.into();
        info!(
            connection_id = %id,
            db_type = %executor.database_type(),
            max_attempts = options.max_attempts_or_default(),
            "Connection ready"
        );
        Ok(Self {
            errors: ErrorChain::new(id.clone()),
            id,
            executor,
            policy: RetryPolicy::new(options.max_attempts_or_default()),
            log_table: options.log_table_or_default().to_string(),
            log_table_ready: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn database_type(&self) -> DatabaseType {
        self.executor.database_type()
    }

    /// Whether the link to the store is believed usable.
    pub fn is_open(&self) -> bool {
        self.executor.is_open()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
    }

    /// Table holding robust-transaction commit markers.
    pub fn log_table(&self) -> &str {
        &self.log_table
    }

    /// Run `transactor` to completion under the connection's retry policy.
    pub fn perform<T>(&mut self, transactor: &mut T) -> TxResult<T::Output>
    where
        T: Transactor + ?Sized,
    {
        let policy = self.policy;
        retry::perform(self, transactor, policy)
    }

    /// Run `transactor` with an explicit attempt budget.
    pub fn perform_with_attempts<T>(&mut self, transactor: &mut T, max_attempts: u32) -> TxResult<T::Output>
    where
        T: Transactor + ?Sized,
    {
        retry::perform(self, transactor, RetryPolicy::new(max_attempts))
    }

    /// Begin a transaction directly, without retries.
    pub fn transaction(&mut self, name: impl Into<String>, kind: TransactionKind) -> TxResult<Transaction<'_>> {
        let mut tx = Transaction::new(self, name, kind, IsolationLevel::Default);
        tx.begin()?;
        Ok(tx)
    }

    /// Push `handler` onto this connection's error chain.
    #[must_use = "the handler is removed as soon as the guard is dropped"]
    pub fn register_error_handler<H>(&self, handler: H) -> ErrorHandlerGuard
    where
        H: ErrorHandler + 'static,
    {
        self.errors.register(handler)
    }

    /// Suppress error reporting until the returned guard is dropped.
    #[must_use = "the handler is removed as soon as the guard is dropped"]
    pub fn quiet_errors(&self) -> ErrorHandlerGuard {
        self.errors.quiet()
    }

    pub fn error_handlers(&self) -> &ErrorChain {
        &self.errors
    }

    /// Send a diagnostic message through the error chain.
    pub fn process_notice(&self, message: &str) {
        self.errors.report(message);
    }

    /// Escape text for a single-quoted literal.
    pub fn esc(&self, text: &str) -> String {
        self.executor.escape(text)
    }

    /// Escape text and wrap it in single quotes.
    pub fn quote(&self, text: &str) -> String {
        format!("'{}'", self.esc(text))
    }

    /// Close the link; the next transaction reopens it.
    pub fn close(&mut self) {
        debug!(connection_id = %self.id, "Closing connection");
        self.executor.close();
    }

    pub(crate) fn executor_mut(&mut self) -> &mut dyn StatementExecutor {
        self.executor.as_mut()
    }

    /// Create the commit log table once per connection.
    pub(crate) fn ensure_log_table(&mut self) -> TxResult<()> {
        if self.log_table_ready {
            return Ok(());
        }
        let sql = dialect::create_log_table(&self.log_table);
        self.executor.execute(&sql)?;
        debug!(connection_id = %self.id, table = %self.log_table, "Commit log table ready");
        self.log_table_ready = true;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("db_type", &self.executor.database_type())
            .field("open", &self.executor.is_open())
            .field("policy", &self.policy)
            .field("error_handlers", &self.errors.depth())
            .finish()
    }
}
