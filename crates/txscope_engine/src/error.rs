//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by the underlying relational engine.
///
/// These are the failures the engine boundary can surface to the scope
/// layer. The scope layer never retries any of them; statement failures
/// propagate through the automatic-mode exit path and force a rollback.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A statement failed to execute.
    #[error("statement failed: {0}")]
    StatementFailed(String),

    /// The enclosing transaction was poisoned by an earlier statement
    /// failure and refuses further work until it is rolled back.
    #[error("transaction poisoned by an earlier statement failure")]
    TransactionPoisoned,

    /// An operation required a transaction but none is in progress.
    #[error("no transaction in progress")]
    NoTransaction,

    /// `begin` was called while a transaction is already in progress.
    #[error("transaction already in progress")]
    AlreadyInTransaction,

    /// The named savepoint does not exist in the current transaction.
    #[error("unknown savepoint \"{0}\"")]
    UnknownSavepoint(String),

    /// The connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The session has been closed.
    #[error("session is closed")]
    SessionClosed,

    /// The engine could not resolve the connection URL.
    #[error("unresolvable connection url \"{0}\"")]
    BadUrl(String),
}

impl EngineError {
    /// Creates a statement failure error.
    pub fn statement_failed(message: impl Into<String>) -> Self {
        Self::StatementFailed(message.into())
    }
}
