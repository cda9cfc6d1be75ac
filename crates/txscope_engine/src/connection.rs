//! Connection and connector trait definitions.

use crate::error::EngineResult;
use crate::statement::{Row, Statement};
use std::sync::Arc;

/// A connection to a relational engine.
///
/// Connections are **opaque transaction executors**. They understand
/// BEGIN/COMMIT/ROLLBACK, named savepoints and the small [`Statement`]
/// model; the scope layer owns all lifecycle interpretation on top.
///
/// # Invariants
///
/// - `begin` fails if a transaction is already in progress
/// - `rollback` is a safe no-op when no transaction is in progress
///   (the scope layer rolls back unconditionally during cleanup)
/// - a failed statement poisons the enclosing transaction:
///   `transaction_active()` reports false until a rollback, while
///   `in_transaction()` stays true
/// - `rollback_to_savepoint` discards changes made after the savepoint
///   and clears the poisoned state, matching engine semantics
///
/// # Implementors
///
/// - [`super::MemoryConnection`] - in-memory engine for tests
pub trait Connection: Send + Sync {
    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or a transaction is
    /// already in progress.
    fn begin(&self) -> EngineResult<()>;

    /// Commits the current transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no transaction is in progress or the
    /// transaction is poisoned.
    fn commit(&self) -> EngineResult<()>;

    /// Rolls back the current transaction.
    ///
    /// A safe no-op when no transaction is in progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn rollback(&self) -> EngineResult<()>;

    /// Reports whether a transaction is in progress.
    fn in_transaction(&self) -> bool;

    /// Reports whether the current transaction is still usable.
    ///
    /// False when no transaction is in progress or when an earlier
    /// statement failure poisoned it.
    fn transaction_active(&self) -> bool;

    /// Creates a named savepoint in the current transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if no usable transaction is in progress.
    fn create_savepoint(&self, name: &str) -> EngineResult<()>;

    /// Releases a named savepoint, keeping its changes.
    ///
    /// Savepoints created after `name` are released along with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the savepoint is unknown or no transaction
    /// is in progress.
    fn release_savepoint(&self, name: &str) -> EngineResult<()>;

    /// Rolls back to a named savepoint, discarding changes made since
    /// its creation. The savepoint itself stays defined.
    ///
    /// # Errors
    ///
    /// Returns an error if the savepoint is unknown or no transaction
    /// is in progress.
    fn rollback_to_savepoint(&self, name: &str) -> EngineResult<()>;

    /// Executes a statement within the current transaction.
    ///
    /// Write statements return an empty row set.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails, the transaction is
    /// poisoned, no transaction is in progress, or the connection is
    /// closed.
    fn execute(&self, statement: &Statement) -> EngineResult<Vec<Row>>;

    /// Disables the driver's implicit statement-level transaction
    /// start, so the scope layer can issue its own BEGIN.
    ///
    /// A one-time, driver-keyed customization applied at connection
    /// open for drivers whose default behavior emits BEGIN (and COMMIT
    /// before DDL) on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed.
    fn disable_driver_autobegin(&self) -> EngineResult<()>;

    /// Closes the connection, rolling back any in-progress transaction.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine fails to release the connection.
    fn close(&self) -> EngineResult<()>;
}

/// A factory for connections.
///
/// Two connections obtained from the same connector for the same URL
/// observe the same committed state; this is what lets a deferred-query
/// drain reopen the database a transaction just disconnected from.
pub trait Connector: Send + Sync {
    /// Opens a connection to the database identified by `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be resolved.
    fn connect(&self, url: &str) -> EngineResult<Arc<dyn Connection>>;
}
