//! Session handle bound to one connection.

use crate::connection::Connection;
use crate::error::{EngineError, EngineResult};
use crate::statement::{Row, Statement};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A stateful handle bound to one connection.
///
/// The session executes statements eagerly and keeps a cache of rows
/// fetched through [`Session::fetch`]. After any [`Session::flush`] the
/// cached row state is considered stale and is refetched on next
/// access — the invalidation contract the scope layer relies on when it
/// flushes before finalizing.
///
/// A session is owned by exactly one root scope and shared read-only
/// with that scope's savepoints; it is closed when the root scope
/// disconnects, after which every call fails with
/// [`EngineError::SessionClosed`].
pub struct Session {
    connection: Arc<dyn Connection>,
    cache: Mutex<HashMap<(String, i64), Row>>,
    closed: Mutex<bool>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cached_rows", &self.cache.lock().len())
            .field("closed", &*self.closed.lock())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session over a connection.
    #[must_use]
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            cache: Mutex::new(HashMap::new()),
            closed: Mutex::new(false),
        }
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if *self.closed.lock() {
            return Err(EngineError::SessionClosed);
        }
        Ok(())
    }

    /// Executes a statement, bypassing the row cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the engine rejects
    /// the statement.
    pub fn execute(&self, statement: &Statement) -> EngineResult<Vec<Row>> {
        self.ensure_open()?;
        self.connection.execute(statement)
    }

    /// Fetches one row by primary key, serving repeated reads from the
    /// session cache until the next flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the read fails.
    pub fn fetch(&self, table: &str, id: i64) -> EngineResult<Option<Row>> {
        self.ensure_open()?;
        let key = (table.to_owned(), id);
        if let Some(row) = self.cache.lock().get(&key) {
            return Ok(Some(row.clone()));
        }
        let row = self
            .connection
            .execute(&Statement::select(table, id))?
            .into_iter()
            .next();
        if let Some(row) = &row {
            self.cache.lock().insert(key, row.clone());
        }
        Ok(row)
    }

    /// Flushes the session: pending state is pushed to the engine and
    /// all cached row state is expired.
    ///
    /// Statements execute eagerly in this session, so the observable
    /// effect is the expiry; the contract is that anything fetched
    /// before a flush is refetched afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed.
    pub fn flush(&self) -> EngineResult<()> {
        self.ensure_open()?;
        self.expire_all();
        Ok(())
    }

    /// Drops all cached row state without flushing.
    pub fn expire_all(&self) {
        self.cache.lock().clear();
    }

    /// Creates a named savepoint through this session's connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the engine rejects
    /// the savepoint.
    pub fn create_savepoint(&self, name: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.connection.create_savepoint(name)
    }

    /// Releases a named savepoint, keeping its changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the savepoint is
    /// unknown.
    pub fn release_savepoint(&self, name: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.connection.release_savepoint(name)
    }

    /// Rolls back to a named savepoint, discarding later changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the savepoint is
    /// unknown.
    pub fn rollback_to_savepoint(&self, name: &str) -> EngineResult<()> {
        self.ensure_open()?;
        self.connection.rollback_to_savepoint(name)
    }

    /// Closes the session. Idempotent. The connection stays open; its
    /// lifecycle belongs to the owning scope.
    pub fn close(&self) {
        self.expire_all();
        *self.closed.lock() = true;
    }

    /// Reports whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}
