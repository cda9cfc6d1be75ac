//! Test fixtures and scenario helpers.
//!
//! Provides a harness wiring a fresh profile registry to the in-memory
//! engine, with helpers for seeding and inspecting committed state.

use std::sync::Arc;
use std::sync::Once;
use txscope_core::{Interrupt, ProfileSpec, Registry, Scope, Transaction};
use txscope_engine::{Connector, MemoryConnector, Statement};
use uuid::Uuid;

/// Table used by harness helpers.
pub const TEST_TABLE: &str = "t";

/// A registry plus in-memory engine, isolated per harness.
///
/// Every harness gets its own database URL, so tests never observe
/// each other's committed state.
pub struct TestHarness {
    registry: Registry,
    connector: Arc<MemoryConnector>,
    url: String,
}

impl TestHarness {
    /// Creates a harness with one default profile named `test`.
    pub fn new() -> Self {
        let url = format!("sqlite://test_{}", Uuid::new_v4().simple());
        let registry = Registry::new();
        registry
            .register(ProfileSpec::new().name("test").url(&url).default(true))
            .expect("failed to register test profile");
        Self {
            registry,
            connector: Arc::new(MemoryConnector::new()),
            url,
        }
    }

    /// Returns the profile registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the harness database URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the in-memory connector.
    pub fn connector(&self) -> Arc<MemoryConnector> {
        Arc::clone(&self.connector)
    }

    /// Creates a closed transaction against the default profile.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(
            &self.registry,
            Arc::clone(&self.connector) as Arc<dyn Connector>,
            None,
        )
        .expect("failed to create transaction")
    }

    /// Commits one row into [`TEST_TABLE`].
    pub fn seed(&self, id: i64, value: &str) {
        let txn = self.transaction();
        txn.scope(|txn| {
            txn.session()?
                .execute(&Statement::insert(TEST_TABLE, id, &[("value", value)]))?;
            Ok(())
        })
        .map_err(Interrupt::into_error)
        .expect("failed to seed row");
    }

    /// Returns the committed `value` column of a row, bypassing any
    /// open transaction.
    pub fn committed(&self, id: i64) -> Option<String> {
        self.connector
            .committed_value(&self.url, TEST_TABLE, id, "value")
    }

    /// Returns the committed row count of [`TEST_TABLE`].
    pub fn committed_count(&self) -> usize {
        self.connector.committed_count(&self.url, TEST_TABLE)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an insert against [`TEST_TABLE`].
pub fn insert(id: i64, value: &str) -> Statement {
    Statement::insert(TEST_TABLE, id, &[("value", value)])
}

/// Builds an update against [`TEST_TABLE`].
pub fn update(id: i64, value: &str) -> Statement {
    Statement::update(TEST_TABLE, id, &[("value", value)])
}

/// Installs a tracing subscriber reading `RUST_LOG`. Idempotent, so
/// every test can call it.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}
