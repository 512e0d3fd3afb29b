//! Transaction-related data models.

use serde::{Deserialize, Serialize};

/// Flavour of transaction a unit of work runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Autocommit; every statement takes effect immediately and nothing can be rolled back.
    NonTransaction,
    /// Ordinary transaction, never retried.
    #[default]
    Work,
    /// Serializable transaction retried across connection loss and serialization conflicts.
    Robust,
}

impl TransactionKind {
    /// Whether the retry engine may run a failed attempt again.
    pub fn is_retrying(&self) -> bool {
        matches!(self, Self::Robust)
    }

    /// Whether statements run inside a BEGIN/COMMIT bracket.
    pub fn is_bracketed(&self) -> bool {
        !matches!(self, Self::NonTransaction)
    }

    /// Resolve the isolation level actually used for a requested one.
    pub fn effective_isolation(&self, requested: IsolationLevel) -> IsolationLevel {
        match self {
            Self::Robust => IsolationLevel::Serializable,
            _ => requested,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonTransaction => write!(f, "nontransaction"),
            Self::Work => write!(f, "transaction"),
            Self::Robust => write!(f, "robust transaction"),
        }
    }
}

/// Isolation level tag of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Whatever the server is configured to use.
    #[default]
    Default,
    Serializable,
}

/// Transaction state machine.
///
/// ```text
/// Inactive -> Active -> Committed
///                    -> Aborted
///                    -> InDoubt
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Inactive,
    Active,
    Committed,
    Aborted,
    /// Commit acknowledgement lost; outcome unknown
    InDoubt,
}

impl TransactionState {
    /// Check if the transaction is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the transaction has ended and can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::InDoubt)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
            Self::InDoubt => "in doubt",
        };
        f.write_str(s)
    }
}

/// Snapshot of a transaction for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub id: String,
    pub name: String,
    pub connection_id: String,
    pub kind: TransactionKind,
    pub isolation: IsolationLevel,
    pub state: TransactionState,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
