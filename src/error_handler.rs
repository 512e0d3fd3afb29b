//! Error notification chain.
//!
//! Each connection owns an ordered chain of handlers that receive diagnostic
//! messages (failed attempts, rollback problems, notices about misuse). The most
//! recently registered handler sees a message first and decides whether older
//! handlers see it too. A message nobody consumes is logged at `warn` level.
//!
//! Registration returns an `ErrorHandlerGuard`; dropping the guard removes the
//! handler again, on every exit path including `?` and panics. A
//! `QuietErrorHandler` consumes everything, silencing a connection for the
//! guard's lifetime.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Receiver of diagnostic messages.
pub trait ErrorHandler: Send + Sync {
    /// Handle a message. Return `true` to pass it on to older handlers,
    /// `false` to consume it.
    fn on_error(&self, message: &str) -> bool;
}

impl<F> ErrorHandler for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn on_error(&self, message: &str) -> bool {
        self(message)
    }
}

/// Handler that swallows every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuietErrorHandler;

impl ErrorHandler for QuietErrorHandler {
    fn on_error(&self, _message: &str) -> bool {
        false
    }
}

struct Entry {
    id: u64,
    handler: Arc<dyn ErrorHandler>,
}

#[derive(Default)]
struct ChainState {
    /// Oldest first; the head of the chain is the last element.
    entries: Vec<Entry>,
    next_id: u64,
}

/// Handler chain owned by a connection.
///
/// Cloning yields another handle to the same chain.
#[derive(Clone)]
pub struct ErrorChain {
    owner: Arc<str>,
    state: Arc<Mutex<ChainState>>,
}

impl ErrorChain {
    /// Create an empty chain for the connection named `owner`.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: Arc::from(owner.into()),
            state: Arc::new(Mutex::new(ChainState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        // A handler that panicked cannot leave the Vec half-updated
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Push `handler` as the new head of the chain.
    #[must_use = "the handler is removed as soon as the guard is dropped"]
    pub fn register<H>(&self, handler: H) -> ErrorHandlerGuard
    where
        H: ErrorHandler + 'static,
    {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push(Entry {
            id,
            handler: Arc::new(handler),
        });
        ErrorHandlerGuard {
            chain: self.clone(),
            id,
        }
    }

    /// Register a `QuietErrorHandler`.
    #[must_use = "the handler is removed as soon as the guard is dropped"]
    pub fn quiet(&self) -> ErrorHandlerGuard {
        self.register(QuietErrorHandler)
    }

    /// Number of registered handlers.
    pub fn depth(&self) -> usize {
        self.lock().entries.len()
    }

    /// Deliver `message` to the chain, newest handler first.
    ///
    /// Returns `true` if some handler consumed it.
    pub fn report(&self, message: &str) -> bool {
        // Snapshot so handlers may register or report without deadlocking
        let handlers: Vec<Arc<dyn ErrorHandler>> = self
            .lock()
            .entries
            .iter()
            .rev()
            .map(|e| Arc::clone(&e.handler))
            .collect();

        for handler in handlers {
            if !handler.on_error(message) {
                return true;
            }
        }

        warn!(connection_id = %self.owner, "{}", message.trim_end());
        false
    }

    fn remove(&self, id: u64) {
        let mut state = self.lock();
        match state.entries.iter().rposition(|e| e.id == id) {
            Some(pos) => {
                if pos + 1 != state.entries.len() {
                    warn!(
                        connection_id = %self.owner,
                        handler_id = id,
                        "Error handler released out of order"
                    );
                }
                state.entries.remove(pos);
            }
            None => warn!(
                connection_id = %self.owner,
                handler_id = id,
                "Error handler already released"
            ),
        }
    }
}

impl std::fmt::Debug for ErrorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorChain")
            .field("owner", &self.owner)
            .field("depth", &self.depth())
            .finish()
    }
}

/// Scoped registration; the handler leaves the chain when this is dropped.
#[must_use = "the handler is removed as soon as the guard is dropped"]
pub struct ErrorHandlerGuard {
    chain: ErrorChain,
    id: u64,
}

impl ErrorHandlerGuard {
    /// Position-independent identifier of this registration.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ErrorHandlerGuard {
    fn drop(&mut self) {
        self.chain.remove(self.id);
    }
}

impl std::fmt::Debug for ErrorHandlerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlerGuard")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl ErrorHandler + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |msg: &str| {
            sink.lock().unwrap().push(msg.to_string());
            true
        };
        (seen, handler)
    }

    #[test]
    fn test_empty_chain_reports_unconsumed() {
        let chain = ErrorChain::new("c1");
        assert_eq!(chain.depth(), 0);
        assert!(!chain.report("nobody listens"));
    }

    #[test]
    fn test_newest_handler_sees_message_first() {
        let chain = ErrorChain::new("c1");
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        let _old = chain.register(move |_: &str| {
            o1.lock().unwrap().push("old");
            true
        });
        let o2 = Arc::clone(&order);
        let _new = chain.register(move |_: &str| {
            o2.lock().unwrap().push("new");
            true
        });

        chain.report("hello");
        assert_eq!(*order.lock().unwrap(), vec!["new", "old"]);
    }

    #[test]
    fn test_consuming_handler_stops_propagation() {
        let chain = ErrorChain::new("c1");
        let (seen, handler) = collector();
        let _outer = chain.register(handler);
        let _quiet = chain.quiet();

        assert!(chain.report("suppressed"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_quiet_scope_restores_reporting() {
        let chain = ErrorChain::new("c1");
        let (seen, handler) = collector();
        let _outer = chain.register(handler);

        {
            let _quiet = chain.quiet();
            chain.report("hidden");
        }
        chain.report("visible");

        assert_eq!(*seen.lock().unwrap(), vec!["visible".to_string()]);
    }

    #[test]
    fn test_depth_restored_after_scope() {
        let chain = ErrorChain::new("c1");
        let before = chain.depth();
        {
            let _a = chain.quiet();
            let _b = chain.register(|_: &str| true);
            assert_eq!(chain.depth(), before + 2);
        }
        assert_eq!(chain.depth(), before);
    }

    #[test]
    fn test_depth_restored_after_error_propagation() {
        fn failing(chain: &ErrorChain) -> Result<(), String> {
            let _quiet = chain.quiet();
            Err("boom".to_string())?;
            Ok(())
        }

        let chain = ErrorChain::new("c1");
        assert!(failing(&chain).is_err());
        assert_eq!(chain.depth(), 0);
    }

    #[test]
    fn test_depth_restored_after_panic() {
        let chain = ErrorChain::new("c1");
        let inner = chain.clone();
        let result = std::panic::catch_unwind(move || {
            let _quiet = inner.quiet();
            panic!("unwinding");
        });
        assert!(result.is_err());
        assert_eq!(chain.depth(), 0);
    }

    #[test]
    fn test_out_of_order_release_removes_right_handler() {
        let chain = ErrorChain::new("c1");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let first = chain.register(move |_: &str| {
            c.fetch_add(1, Ordering::SeqCst);
            true
        });
        let second = chain.quiet();

        drop(first);
        assert_eq!(chain.depth(), 1);
        assert!(chain.report("still quiet"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        drop(second);
        assert_eq!(chain.depth(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let chain = ErrorChain::new("c1");
        let other = chain.clone();
        let _quiet = other.quiet();
        assert_eq!(chain.depth(), 1);
    }

    #[test]
    fn test_chains_are_independent() {
        let a = ErrorChain::new("a");
        let b = ErrorChain::new("b");
        let _quiet = a.quiet();
        assert!(a.report("x"));
        assert!(!b.report("x"));
        assert_eq!(b.depth(), 0);
    }

    #[test]
    fn test_handler_may_report_reentrantly() {
        let chain = ErrorChain::new("c1");
        let (seen, handler) = collector();
        let _base = chain.register(handler);
        let inner = chain.clone();
        let _relay = chain.register(move |msg: &str| {
            if msg == "outer" {
                let _quiet = inner.quiet();
                inner.report("nested");
            }
            true
        });

        chain.report("outer");
        assert_eq!(*seen.lock().unwrap(), vec!["outer".to_string()]);
        assert_eq!(chain.depth(), 2);
    }
}
