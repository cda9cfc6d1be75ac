//! Nested, scoped database transactions.
//!
//! txscope manages one engine transaction per root scope and an
//! arbitrarily deep stack of savepoints beneath it, with a uniform
//! lifecycle over both. Profiles describe where to connect, the
//! [`Registry`] stores them, and [`Transaction`] / [`Savepoint`] run
//! the work.
//!
//! ```rust
//! use std::sync::Arc;
//! use txscope_core::{ProfileSpec, Registry, Scope, Transaction};
//! use txscope_engine::{Connector, MemoryConnector, Statement};
//!
//! # fn main() -> Result<(), txscope_core::CoreError> {
//! let registry = Registry::new();
//! registry.register(
//!     ProfileSpec::new()
//!         .name("primary")
//!         .url("sqlite://demo")
//!         .default(true),
//! )?;
//!
//! let connector: Arc<dyn Connector> = Arc::new(MemoryConnector::new());
//! let txn = Transaction::new(&registry, connector, None)?;
//! txn.scope(|txn| {
//!     txn.session()?
//!         .execute(&Statement::insert("users", 1, &[("name", "ada")]))?;
//!     Ok(())
//! })
//! .map_err(txscope_core::Interrupt::into_error)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod profile;
mod scope;
mod types;

pub use error::{CoreError, CoreResult};
pub use profile::{DatabaseProfile, DriverKind, ProfileSpec, Registry};
pub use scope::{
    Interrupt, LifecycleState, Savepoint, Scope, ScopeResult, Transaction, Unwind, UnwindKind,
};
pub use types::{SavepointName, ScopeId, ScopeKind};
