//! Transaction scopes and their shared lifecycle machine.
//!
//! A scope is one level of transactional nesting: the root scope is
//! the transaction itself, every deeper level is a savepoint. Both
//! variants run the same state machine, implemented here as provided
//! methods on [`Scope`]; the variants supply the finalization hooks.
//!
//! Two control surfaces exist. Explicit control is `open`, work,
//! `commit` or `rollback`, `close`. Scoped acquisition hands the
//! lifecycle to a boundary: [`Scope::scope`] opens the scope, runs a
//! closure against it, commits on normal completion, rolls back on
//! error, and participates in multi-level unwinding (see [`Unwind`]
//! and [`Interrupt`]).

mod savepoint;
mod signal;
mod transaction;

pub use savepoint::Savepoint;
pub use signal::{Interrupt, ScopeResult, Unwind, UnwindKind};
pub use transaction::Transaction;

use crate::error::{CoreError, CoreResult};
use crate::profile::DatabaseProfile;
use crate::types::{ScopeId, ScopeKind};
use std::sync::Arc;
use tracing::{debug, warn};
use txscope_engine::Session;

/// Raw lifecycle state of a scope.
///
/// `Open` means the scope believes it holds live engine resources;
/// [`Scope::is_active`] is the refined check that also consults the
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No engine resources held.
    Closed,
    /// Engine resources acquired and not yet finalized.
    Open,
}

/// One level of transactional nesting.
///
/// The provided methods implement the lifecycle machine shared by the
/// root transaction and savepoints; implementors supply identity,
/// state access and the variant-specific finalization hooks. The
/// hooks are not meant to be called directly.
pub trait Scope {
    /// Returns the unique identity of this scope.
    fn id(&self) -> ScopeId;

    /// Returns which variant of scope this is.
    fn kind(&self) -> ScopeKind;

    /// Returns the profile of the root this scope belongs to.
    fn profile(&self) -> &DatabaseProfile;

    /// Returns the raw lifecycle state.
    fn lifecycle(&self) -> LifecycleState;

    /// Reports whether the scope is genuinely active.
    ///
    /// For the root scope this consults the engine and repairs stale
    /// local state as a side effect; for savepoints it also requires
    /// an active parent.
    fn is_active(&self) -> bool;

    /// Reports whether a boundary currently owns this scope's
    /// lifecycle.
    fn automatic_mode(&self) -> bool;

    /// Hands lifecycle ownership to a boundary, or takes it back.
    fn set_automatic_mode(&self, enabled: bool);

    /// Returns the session this scope executes statements through.
    ///
    /// Savepoints resolve this through their parent chain; the session
    /// belongs to the root.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Inactive`] when the root is not active.
    fn session(&self) -> CoreResult<Arc<Session>>;

    /// Acquires engine resources for this scope.
    fn acquire(&self) -> CoreResult<()>;

    /// Makes this scope's effects permanent at its level and releases
    /// its resources.
    fn commit_finalize(&self) -> CoreResult<()>;

    /// Discards this scope's effects and releases its resources.
    fn rollback_finalize(&self) -> CoreResult<()>;

    /// Variant behavior for `commit` on a closed scope.
    fn commit_when_closed(&self) -> CoreResult<()>;

    /// Opens the scope explicitly. Fluent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AlreadyInAutomaticMode`] inside a boundary
    /// and [`CoreError::AlreadyOpen`] when the scope is already open.
    fn open(&self) -> CoreResult<&Self>
    where
        Self: Sized,
    {
        if self.automatic_mode() {
            return Err(CoreError::AlreadyInAutomaticMode { scope: self.kind() });
        }
        if self.lifecycle() == LifecycleState::Open {
            return Err(CoreError::AlreadyOpen { scope: self.kind() });
        }
        self.acquire()?;
        debug!(scope = %self.id(), kind = %self.kind(), "scope opened");
        Ok(self)
    }

    /// Closes the scope, rolling back anything uncommitted. Closing a
    /// closed scope is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StillInAutomaticMode`] inside a boundary;
    /// otherwise propagates finalization failures.
    fn close(&self) -> CoreResult<()> {
        if self.automatic_mode() {
            return Err(CoreError::StillInAutomaticMode { scope: self.kind() });
        }
        if self.lifecycle() == LifecycleState::Closed {
            return Ok(());
        }
        self.rollback_finalize()?;
        debug!(scope = %self.id(), kind = %self.kind(), "scope closed");
        Ok(())
    }

    /// Commits the scope.
    ///
    /// Inside a boundary this does not finalize in place: it raises an
    /// unwind signal addressed to this scope, so every intermediate
    /// boundary between the call site and this scope commits its own
    /// level on the way out.
    fn commit(&self) -> ScopeResult<()> {
        if self.lifecycle() == LifecycleState::Closed {
            self.commit_when_closed()?;
            return Ok(());
        }
        if self.automatic_mode() {
            return Err(Interrupt::Unwind(Unwind::committed(self.id())));
        }
        self.commit_finalize()?;
        Ok(())
    }

    /// Rolls the scope back. Rolling back a closed scope is a no-op.
    ///
    /// Inside a boundary this raises a rollback unwind signal, exactly
    /// as [`Scope::commit`] raises a commit one.
    fn rollback(&self) -> ScopeResult<()> {
        if self.lifecycle() == LifecycleState::Closed {
            return Ok(());
        }
        if self.automatic_mode() {
            return Err(Interrupt::Unwind(Unwind::rolled_back(self.id())));
        }
        self.rollback_finalize()?;
        Ok(())
    }

    /// Creates a savepoint nested under this scope.
    ///
    /// The savepoint is constructed closed; open it explicitly or run
    /// it through [`Scope::scope`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Inactive`] when this scope is not active.
    fn savepoint(&self) -> CoreResult<Savepoint<'_>>
    where
        Self: Sized,
    {
        if !self.is_active() {
            return Err(CoreError::inactive(self.kind()));
        }
        Savepoint::nested_under(self)
    }

    /// Runs `body` inside a boundary that owns this scope's lifecycle.
    ///
    /// The scope is opened, `body` runs against it, and the boundary
    /// finalizes on the way out: commit on normal completion, rollback
    /// on error. An unwind signal crossing this boundary finalizes
    /// this scope according to the signal's kind and is then consumed
    /// if it targets this scope, or re-raised towards its target
    /// otherwise.
    ///
    /// Returns `Ok(Some(value))` on normal completion, `Ok(None)` when
    /// an unwind addressed to this scope was consumed here.
    fn scope<T, F>(&self, body: F) -> ScopeResult<Option<T>>
    where
        Self: Sized,
        F: FnOnce(&Self) -> ScopeResult<T>,
    {
        self.open()?;
        self.set_automatic_mode(true);
        let outcome = body(self);
        self.set_automatic_mode(false);

        match outcome {
            Ok(value) => {
                if let Err(err) = self.commit_finalize() {
                    self.rollback_after_failure(&err);
                    return Err(Interrupt::Error(err));
                }
                Ok(Some(value))
            }
            Err(Interrupt::Unwind(unwind)) => {
                // Finalize this level no matter where the signal is
                // headed; target identity only decides whether it
                // stops here.
                let finalized = match unwind.kind() {
                    UnwindKind::Committed => self.commit_finalize(),
                    UnwindKind::RolledBack => self.rollback_finalize(),
                };
                if let Err(err) = finalized {
                    self.rollback_after_failure(&err);
                    return Err(Interrupt::Error(err));
                }
                if unwind.targets(self.id()) {
                    debug!(scope = %self.id(), signal = %unwind, "unwind consumed");
                    Ok(None)
                } else {
                    Err(Interrupt::Unwind(unwind))
                }
            }
            Err(Interrupt::Error(err)) => {
                self.rollback_after_failure(&err);
                Err(Interrupt::Error(err))
            }
        }
    }

    /// Best-effort rollback while an error is already in flight. The
    /// original error stays the one the caller sees.
    #[doc(hidden)]
    fn rollback_after_failure(&self, cause: &CoreError) {
        if self.lifecycle() == LifecycleState::Closed {
            return;
        }
        if let Err(rollback_err) = self.rollback_finalize() {
            warn!(
                scope = %self.id(),
                cause = %cause,
                error = %rollback_err,
                "rollback during error handling failed"
            );
        }
    }
}
