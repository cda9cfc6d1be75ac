//! Nested scopes: one SAVEPOINT level under a parent scope.

use crate::error::{CoreError, CoreResult};
use crate::profile::DatabaseProfile;
use crate::scope::{LifecycleState, Scope};
use crate::types::{SavepointName, ScopeId, ScopeKind};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use txscope_engine::Session;

/// A nested transaction scope.
///
/// A savepoint borrows its parent scope and executes through the
/// parent's session: opening issues SAVEPOINT, committing flushes and
/// issues RELEASE, rolling back issues ROLLBACK TO. Savepoints nest to
/// arbitrary depth; each level carries a generated name unique to the
/// connection.
///
/// Unlike the root scope, committing an already-finalized savepoint is
/// an error. A finalized root left nothing pending; a finalized
/// savepoint still has a parent whose fate is undecided, so the
/// mistaken call has to surface.
pub struct Savepoint<'p> {
    id: ScopeId,
    name: SavepointName,
    parent: &'p dyn Scope,
    state: Mutex<State>,
}

struct State {
    lifecycle: LifecycleState,
    automatic_mode: bool,
}

impl std::fmt::Debug for Savepoint<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Savepoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<'p> Savepoint<'p> {
    pub(crate) fn nested_under(parent: &'p dyn Scope) -> CoreResult<Self> {
        let id = ScopeId::new();
        // Scope IDs are freshly generated, so a collision with the
        // parent cannot occur; the guard stays as a safeguard against
        // future construction paths.
        if parent.id() == id {
            return Err(CoreError::SavepointSelfParent);
        }
        Ok(Self {
            id,
            name: SavepointName::generate(),
            parent,
            state: Mutex::new(State {
                lifecycle: LifecycleState::Closed,
                automatic_mode: false,
            }),
        })
    }

    /// Returns the generated engine-level savepoint name.
    #[must_use]
    pub fn name(&self) -> &SavepointName {
        &self.name
    }
}

impl Scope for Savepoint<'_> {
    fn id(&self) -> ScopeId {
        self.id
    }

    fn kind(&self) -> ScopeKind {
        ScopeKind::Savepoint
    }

    fn profile(&self) -> &DatabaseProfile {
        self.parent.profile()
    }

    fn lifecycle(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    // Active only while every ancestor up to the root is active too;
    // the root's check repairs stale state along the way.
    fn is_active(&self) -> bool {
        self.lifecycle() == LifecycleState::Open && self.parent.is_active()
    }

    fn automatic_mode(&self) -> bool {
        self.state.lock().automatic_mode
    }

    fn set_automatic_mode(&self, enabled: bool) {
        self.state.lock().automatic_mode = enabled;
    }

    // Resolution walks the parent chain to the root; a savepoint's own
    // lifecycle does not gate access to the shared session.
    fn session(&self) -> CoreResult<Arc<Session>> {
        self.parent.session()
    }

    fn acquire(&self) -> CoreResult<()> {
        let session = self.parent.session()?;
        session.create_savepoint(self.name.as_str())?;
        self.state.lock().lifecycle = LifecycleState::Open;
        Ok(())
    }

    fn commit_finalize(&self) -> CoreResult<()> {
        let session = self.parent.session()?;
        session.flush()?;
        session.release_savepoint(self.name.as_str())?;
        self.state.lock().lifecycle = LifecycleState::Closed;
        debug!(scope = %self.id, name = %self.name, "savepoint released");
        Ok(())
    }

    // Terminal: the savepoint ends up closed even when the engine
    // rollback fails, since its level is unusable either way.
    fn rollback_finalize(&self) -> CoreResult<()> {
        let result = self.parent.session().and_then(|session| {
            session.rollback_to_savepoint(self.name.as_str())?;
            // Rows cached before the rollback may no longer exist.
            session.expire_all();
            Ok(())
        });
        self.state.lock().lifecycle = LifecycleState::Closed;
        debug!(scope = %self.id, name = %self.name, "savepoint rolled back");
        result
    }

    fn commit_when_closed(&self) -> CoreResult<()> {
        Err(CoreError::inactive(ScopeKind::Savepoint))
    }
}
