//! The multi-level unwind channel.
//!
//! Finalizing an ancestor scope from inside a descendant does not
//! return normally: it travels outward as an [`Unwind`] value carried
//! on the error track of every intermediate boundary. Each boundary it
//! crosses finalizes its own scope according to the signal's kind, and
//! the boundary whose scope identity matches the signal's target
//! consumes it. An unwind is ordinary control flow, not a failure;
//! genuine failures travel beside it as [`Interrupt::Error`] and are
//! never consumed by a boundary.

use crate::error::CoreError;
use crate::types::ScopeId;
use std::fmt;
use txscope_engine::EngineError;

/// How each boundary crossed by an unwind signal finalizes its scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindKind {
    /// Every crossed scope commits its level.
    Committed,
    /// Every crossed scope rolls back its level.
    RolledBack,
}

impl fmt::Display for UnwindKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// An in-flight request to finalize the scope identified by `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind {
    kind: UnwindKind,
    target: ScopeId,
}

impl Unwind {
    /// Creates a commit-everything-up-to-`target` signal.
    #[must_use]
    pub fn committed(target: ScopeId) -> Self {
        Self {
            kind: UnwindKind::Committed,
            target,
        }
    }

    /// Creates a roll-back-everything-up-to-`target` signal.
    #[must_use]
    pub fn rolled_back(target: ScopeId) -> Self {
        Self {
            kind: UnwindKind::RolledBack,
            target,
        }
    }

    /// Returns how crossed boundaries finalize their scope.
    #[must_use]
    pub fn kind(self) -> UnwindKind {
        self.kind
    }

    /// Returns the identity of the scope this signal is addressed to.
    #[must_use]
    pub fn target(self) -> ScopeId {
        self.target
    }

    /// Reports whether this signal is addressed to `scope`.
    #[must_use]
    pub fn targets(self, scope: ScopeId) -> bool {
        self.target == scope
    }
}

impl fmt::Display for Unwind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unwind towards {}", self.kind, self.target)
    }
}

/// What travels outward on the error track of a scope boundary.
///
/// `?` works on both arms inside a boundary closure: [`CoreError`] and
/// [`EngineError`] convert into the `Error` arm.
#[derive(Debug)]
pub enum Interrupt {
    /// An unwind signal addressed to some enclosing scope.
    Unwind(Unwind),
    /// A genuine failure. Boundaries roll back and re-raise it.
    Error(CoreError),
}

impl Interrupt {
    /// Converts the interrupt into a plain error for surfaces where no
    /// enclosing boundary remains to consume an unwind.
    #[must_use]
    pub fn into_error(self) -> CoreError {
        match self {
            Self::Unwind(unwind) => CoreError::UnconsumedUnwind {
                target: unwind.target(),
            },
            Self::Error(err) => err,
        }
    }
}

impl From<CoreError> for Interrupt {
    fn from(err: CoreError) -> Self {
        Self::Error(err)
    }
}

impl From<EngineError> for Interrupt {
    fn from(err: EngineError) -> Self {
        Self::Error(CoreError::Engine(err))
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unwind(unwind) => unwind.fmt(f),
            Self::Error(err) => err.fmt(f),
        }
    }
}

/// Result type for code running inside a scope boundary.
pub type ScopeResult<T> = Result<T, Interrupt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_targets_only_its_scope() {
        let target = ScopeId::new();
        let other = ScopeId::new();
        let unwind = Unwind::committed(target);
        assert!(unwind.targets(target));
        assert!(!unwind.targets(other));
        assert_eq!(unwind.kind(), UnwindKind::Committed);
    }

    #[test]
    fn escaped_unwind_becomes_error() {
        let target = ScopeId::new();
        let err = Interrupt::Unwind(Unwind::rolled_back(target)).into_error();
        assert!(matches!(err, CoreError::UnconsumedUnwind { .. }));
    }

    #[test]
    fn errors_pass_through_unchanged() {
        let err = Interrupt::from(CoreError::DefaultProfileNotFound).into_error();
        assert!(matches!(err, CoreError::DefaultProfileNotFound));
    }
}
