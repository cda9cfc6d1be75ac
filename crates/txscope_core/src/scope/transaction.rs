//! The root scope: one engine transaction on a dedicated connection.

use crate::error::{CoreError, CoreResult};
use crate::profile::{DatabaseProfile, DriverKind, Registry};
use crate::scope::{Interrupt, LifecycleState, Scope};
use crate::types::{ScopeId, ScopeKind};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, warn};
use txscope_engine::{Connection, Connector, Session, Statement};

/// The root transaction scope.
///
/// Opening connects to the database named by the profile and begins an
/// engine transaction; committing or rolling back finalizes it and
/// disconnects. A transaction object is reusable: after finalization
/// it returns to the closed state and can be opened again.
///
/// Statements deferred with [`Transaction::defer`] are held until the
/// transaction finalizes, then executed in FIFO order inside a fresh
/// transaction against the same profile, whether the original
/// committed or rolled back.
pub struct Transaction {
    id: ScopeId,
    profile: DatabaseProfile,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    connection: Option<Arc<dyn Connection>>,
    session: Option<Arc<Session>>,
    connected: bool,
    automatic_mode: bool,
    deferred: VecDeque<Statement>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Creates a closed transaction against the profile registered
    /// under `name`, or the registry default when `name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile lookup fails.
    pub fn new(
        registry: &Registry,
        connector: Arc<dyn Connector>,
        name: Option<&str>,
    ) -> CoreResult<Self> {
        Ok(Self::with_profile(registry.lookup(name)?, connector))
    }

    /// Creates a closed transaction against an explicit profile.
    #[must_use]
    pub fn with_profile(profile: DatabaseProfile, connector: Arc<dyn Connector>) -> Self {
        Self {
            id: ScopeId::new(),
            profile,
            connector,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Queues a write statement for execution after this transaction
    /// finalizes. Fluent.
    ///
    /// Deferred statements run in submission order inside a fresh
    /// transaction against the same profile, regardless of whether
    /// this one commits or rolls back.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStatementKind`] for a non-write
    /// statement.
    pub fn defer(&self, statement: Statement) -> CoreResult<&Self> {
        if !statement.is_write() {
            return Err(CoreError::InvalidStatementKind);
        }
        self.inner.lock().deferred.push_back(statement);
        Ok(self)
    }

    /// Returns how many statements are currently queued.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.inner.lock().deferred.len()
    }

    /// Flushes the session. A no-op when the transaction is inactive.
    ///
    /// # Errors
    ///
    /// Propagates engine failures from the flush itself.
    pub fn flush(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if !self.refresh_liveness(&mut inner) {
            return Ok(());
        }
        if let Some(session) = &inner.session {
            session.flush()?;
        }
        Ok(())
    }

    /// Reports liveness and repairs stale local state.
    ///
    /// The transaction is active only while the local connected flag
    /// and the engine agree. When the engine transaction has ended
    /// underneath us (poisoned by a failed statement, finalized out of
    /// band) the local state is cleaned up here, so the check doubles
    /// as lazy self-healing.
    fn refresh_liveness(&self, inner: &mut Inner) -> bool {
        let alive = match &inner.connection {
            Some(connection) => {
                inner.connected && connection.in_transaction() && connection.transaction_active()
            }
            None => false,
        };
        if !alive && inner.connected {
            debug!(scope = %self.id, "engine transaction ended; repairing local state");
            if let Err(err) = self.cleanup(inner) {
                error!(scope = %self.id, error = %err, "cleanup of dead transaction failed");
            }
        }
        alive
    }

    /// Releases engine resources and drains the deferred queue.
    ///
    /// Idempotent. Any in-progress engine transaction is rolled back;
    /// committing happens before cleanup, never inside it.
    fn cleanup(&self, inner: &mut Inner) -> CoreResult<()> {
        if let Some(session) = inner.session.take() {
            session.close();
        }
        inner.connected = false;
        if let Some(connection) = inner.connection.take() {
            if connection.in_transaction() {
                connection.rollback()?;
            }
            connection.close()?;
        }
        let deferred: Vec<Statement> = inner.deferred.drain(..).collect();
        if !deferred.is_empty() {
            self.drain_deferred(deferred)?;
        }
        Ok(())
    }

    /// Executes queued statements in FIFO order inside a fresh
    /// transaction against the same profile.
    fn drain_deferred(&self, statements: Vec<Statement>) -> CoreResult<()> {
        debug!(scope = %self.id, count = statements.len(), "draining deferred statements");
        let txn = Transaction::with_profile(self.profile.clone(), Arc::clone(&self.connector));
        txn.scope(|txn| {
            let session = txn.session()?;
            for statement in &statements {
                session.execute(statement)?;
            }
            Ok(())
        })
        .map_err(Interrupt::into_error)?;
        Ok(())
    }
}

impl Scope for Transaction {
    fn id(&self) -> ScopeId {
        self.id
    }

    fn kind(&self) -> ScopeKind {
        ScopeKind::Transaction
    }

    fn profile(&self) -> &DatabaseProfile {
        &self.profile
    }

    fn lifecycle(&self) -> LifecycleState {
        if self.inner.lock().connected {
            LifecycleState::Open
        } else {
            LifecycleState::Closed
        }
    }

    fn is_active(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh_liveness(&mut inner)
    }

    fn automatic_mode(&self) -> bool {
        self.inner.lock().automatic_mode
    }

    fn set_automatic_mode(&self, enabled: bool) {
        self.inner.lock().automatic_mode = enabled;
    }

    fn session(&self) -> CoreResult<Arc<Session>> {
        let mut inner = self.inner.lock();
        if !self.refresh_liveness(&mut inner) {
            return Err(CoreError::inactive(ScopeKind::Transaction));
        }
        inner
            .session
            .clone()
            .ok_or_else(|| CoreError::inactive(ScopeKind::Transaction))
    }

    fn acquire(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        // Statements deferred while closed belong to a finalization
        // that never happened; a fresh transaction starts empty.
        inner.deferred.clear();
        let connection = self.connector.connect(self.profile.url())?;
        if self.profile.driver() == DriverKind::Sqlite {
            connection.disable_driver_autobegin()?;
        }
        connection.begin()?;
        inner.session = Some(Arc::new(Session::new(Arc::clone(&connection))));
        inner.connection = Some(connection);
        inner.connected = true;
        Ok(())
    }

    fn commit_finalize(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        // A transaction the engine already killed has nothing left to
        // commit; the liveness check cleans up (and drains deferred
        // statements) on the way, so the commit becomes a no-op.
        if !self.refresh_liveness(&mut inner) {
            return Ok(());
        }
        if let Some(session) = &inner.session {
            session.flush()?;
        }
        if let Some(connection) = &inner.connection {
            if let Err(err) = connection.commit() {
                // Release resources before surfacing the failure so
                // no error path leaks an open connection.
                if let Err(cleanup_err) = self.cleanup(&mut inner) {
                    warn!(scope = %self.id, error = %cleanup_err, "cleanup after failed commit failed");
                }
                return Err(err.into());
            }
        }
        debug!(scope = %self.id, "transaction committed");
        self.cleanup(&mut inner)
    }

    fn rollback_finalize(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(connection) = &inner.connection {
            if let Err(err) = connection.rollback() {
                warn!(scope = %self.id, error = %err, "rollback failed");
            }
        }
        debug!(scope = %self.id, "transaction rolled back");
        self.cleanup(&mut inner)
    }

    // Committing an already-finalized transaction is a no-op; the
    // matching savepoint call is an error. See `Savepoint`.
    fn commit_when_closed(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileSpec;
    use crate::scope::ScopeResult;
    use proptest::prelude::*;
    use txscope_engine::MemoryConnector;
    use uuid::Uuid;

    struct Fixture {
        connector: Arc<MemoryConnector>,
        url: String,
        registry: Registry,
    }

    impl Fixture {
        fn new() -> Self {
            let url = format!("sqlite://test_{}", Uuid::new_v4().simple());
            let registry = Registry::new();
            registry
                .register(ProfileSpec::new().name("test").url(&url).default(true))
                .unwrap();
            Self {
                connector: Arc::new(MemoryConnector::new()),
                url,
                registry,
            }
        }

        fn transaction(&self) -> Transaction {
            Transaction::new(
                &self.registry,
                Arc::clone(&self.connector) as Arc<dyn Connector>,
                None,
            )
            .unwrap()
        }

        fn committed(&self, id: i64) -> Option<String> {
            self.connector.committed_value(&self.url, "t", id, "value")
        }
    }

    #[test]
    fn commit_persists_writes() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        assert!(txn.is_active());
        txn.session()
            .unwrap()
            .execute(&Statement::insert("t", 1, &[("value", "1")]))
            .unwrap();
        assert_eq!(fx.committed(1), None);
        txn.commit().map_err(Interrupt::into_error).unwrap();
        assert!(!txn.is_active());
        assert_eq!(fx.committed(1), Some("1".to_owned()));
    }

    #[test]
    fn close_rolls_back_uncommitted_work() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        txn.session()
            .unwrap()
            .execute(&Statement::insert("t", 1, &[("value", "1")]))
            .unwrap();
        txn.close().unwrap();
        assert_eq!(fx.committed(1), None);
        // Closing again is a no-op.
        txn.close().unwrap();
    }

    #[test]
    fn double_open_is_rejected() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        assert!(matches!(
            txn.open(),
            Err(CoreError::AlreadyOpen {
                scope: ScopeKind::Transaction
            })
        ));
        txn.close().unwrap();
    }

    #[test]
    fn finalizers_on_closed_transaction_are_noops() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.commit().map_err(Interrupt::into_error).unwrap();
        txn.rollback().map_err(Interrupt::into_error).unwrap();
        txn.close().unwrap();
        txn.flush().unwrap();
        assert!(matches!(
            txn.session(),
            Err(CoreError::Inactive {
                scope: ScopeKind::Transaction
            })
        ));
        assert!(matches!(
            txn.savepoint(),
            Err(CoreError::Inactive {
                scope: ScopeKind::Transaction
            })
        ));
    }

    #[test]
    fn transaction_is_reusable_after_finalization() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        txn.rollback().map_err(Interrupt::into_error).unwrap();
        txn.open().unwrap();
        txn.session()
            .unwrap()
            .execute(&Statement::insert("t", 2, &[("value", "2")]))
            .unwrap();
        txn.commit().map_err(Interrupt::into_error).unwrap();
        assert_eq!(fx.committed(2), Some("2".to_owned()));
    }

    #[test]
    fn boundary_commits_on_normal_completion() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        let result = txn.scope(|txn| {
            txn.session()?
                .execute(&Statement::insert("t", 1, &[("value", "1")]))?;
            Ok(7)
        });
        assert!(matches!(result, Ok(Some(7))));
        assert_eq!(fx.committed(1), Some("1".to_owned()));
    }

    #[test]
    fn boundary_rolls_back_on_error() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        let result: ScopeResult<Option<()>> = txn.scope(|txn| {
            txn.session()?
                .execute(&Statement::insert("t", 1, &[("value", "1")]))?;
            Err(Interrupt::from(CoreError::DefaultProfileNotFound))
        });
        assert!(matches!(
            result,
            Err(Interrupt::Error(CoreError::DefaultProfileNotFound))
        ));
        assert_eq!(fx.committed(1), None);
        assert!(!txn.is_active());
    }

    #[test]
    fn early_commit_inside_boundary_is_consumed() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        let result: ScopeResult<Option<()>> = txn.scope(|txn| {
            txn.session()?
                .execute(&Statement::insert("t", 1, &[("value", "1")]))?;
            txn.commit()?;
            unreachable!("commit unwinds past this point");
        });
        assert!(matches!(result, Ok(None)));
        assert_eq!(fx.committed(1), Some("1".to_owned()));
    }

    #[test]
    fn early_rollback_inside_boundary_is_consumed() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        let result: ScopeResult<Option<()>> = txn.scope(|txn| {
            txn.session()?
                .execute(&Statement::insert("t", 1, &[("value", "1")]))?;
            txn.rollback()?;
            unreachable!("rollback unwinds past this point");
        });
        assert!(matches!(result, Ok(None)));
        assert_eq!(fx.committed(1), None);
    }

    #[test]
    fn explicit_lifecycle_calls_rejected_inside_boundary() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.scope(|txn| {
            assert!(matches!(
                txn.close(),
                Err(CoreError::StillInAutomaticMode { .. })
            ));
            assert!(matches!(
                txn.open(),
                Err(CoreError::AlreadyInAutomaticMode { .. })
            ));
            Ok(())
        })
        .map_err(Interrupt::into_error)
        .unwrap();
    }

    #[test]
    fn liveness_check_repairs_poisoned_transaction() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        let session = txn.session().unwrap();
        session
            .execute(&Statement::insert("t", 1, &[("value", "1")]))
            .unwrap();
        // A duplicate insert poisons the engine transaction.
        assert!(session
            .execute(&Statement::insert("t", 1, &[("value", "dup")]))
            .is_err());
        assert!(!txn.is_active());
        assert_eq!(txn.lifecycle(), LifecycleState::Closed);
        assert_eq!(fx.committed(1), None);
        // Repaired state supports reopening.
        txn.open().unwrap();
        txn.close().unwrap();
    }

    #[test]
    fn commit_on_poisoned_transaction_heals_and_drains_deferred() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        txn.defer(Statement::insert("t", 9, &[("value", "deferred")]))
            .unwrap();
        let session = txn.session().unwrap();
        session
            .execute(&Statement::insert("t", 1, &[("value", "1")]))
            .unwrap();
        assert!(session
            .execute(&Statement::insert("t", 1, &[("value", "dup")]))
            .is_err());
        // The engine killed the transaction; commit repairs instead of
        // failing, and the deferred queue still runs.
        txn.commit().map_err(Interrupt::into_error).unwrap();
        assert!(!txn.is_active());
        assert_eq!(txn.deferred_count(), 0);
        assert_eq!(fx.committed(1), None);
        assert_eq!(fx.committed(9), Some("deferred".to_owned()));
    }

    #[test]
    fn deferred_statements_run_after_rollback() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        txn.defer(Statement::insert("t", 9, &[("value", "deferred")]))
            .unwrap();
        assert_eq!(txn.deferred_count(), 1);
        txn.rollback().map_err(Interrupt::into_error).unwrap();
        assert_eq!(txn.deferred_count(), 0);
        assert_eq!(fx.committed(9), Some("deferred".to_owned()));
    }

    #[test]
    fn deferred_statements_run_after_commit_in_order() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.open().unwrap();
        txn.defer(Statement::insert("t", 9, &[("value", "first")]))
            .unwrap();
        txn.defer(Statement::update("t", 9, &[("value", "second")]))
            .unwrap();
        txn.commit().map_err(Interrupt::into_error).unwrap();
        assert_eq!(fx.committed(9), Some("second".to_owned()));
    }

    #[test]
    fn open_clears_stale_deferred_statements() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        txn.defer(Statement::insert("t", 9, &[("value", "stale")]))
            .unwrap();
        txn.open().unwrap();
        assert_eq!(txn.deferred_count(), 0);
        txn.close().unwrap();
        assert_eq!(fx.committed(9), None);
    }

    #[test]
    fn only_writes_can_be_deferred() {
        let fx = Fixture::new();
        let txn = fx.transaction();
        assert!(matches!(
            txn.defer(Statement::select("t", 1)),
            Err(CoreError::InvalidStatementKind)
        ));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Open,
        Close,
        Commit,
        Rollback,
    }

    proptest! {
        // Any interleaving of lifecycle calls keeps local state and
        // engine state in agreement and never panics.
        #[test]
        fn lifecycle_machine_stays_consistent(ops in proptest::collection::vec(
            prop_oneof![
                Just(Op::Open),
                Just(Op::Close),
                Just(Op::Commit),
                Just(Op::Rollback),
            ],
            1..24,
        )) {
            let fx = Fixture::new();
            let txn = fx.transaction();
            let mut open = false;
            for op in ops {
                match op {
                    Op::Open => {
                        let result = txn.open();
                        if open {
                            let rejected = matches!(result, Err(CoreError::AlreadyOpen { .. }));
                            prop_assert!(rejected, "second open must fail with AlreadyOpen");
                        } else {
                            prop_assert!(result.is_ok());
                            open = true;
                        }
                    }
                    Op::Close => {
                        prop_assert!(txn.close().is_ok());
                        open = false;
                    }
                    Op::Commit => {
                        prop_assert!(txn.commit().is_ok());
                        open = false;
                    }
                    Op::Rollback => {
                        prop_assert!(txn.rollback().is_ok());
                        open = false;
                    }
                }
                prop_assert_eq!(txn.is_active(), open);
            }
        }
    }
}
