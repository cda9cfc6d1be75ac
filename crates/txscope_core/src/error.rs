//! Error types for txscope core.

use crate::types::{ScopeId, ScopeKind};
use thiserror::Error;
use txscope_engine::EngineError;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in txscope core operations.
///
/// Three families: configuration errors (surfaced immediately, never
/// recovered), lifecycle-misuse errors (always surfaced to the caller,
/// never silently corrected - they indicate a programming error, not a
/// transient condition), and engine errors (propagated as-is, never
/// retried).
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested profile is not registered.
    #[error("profile \"{name}\" is not registered")]
    ProfileNotFound {
        /// The name that was looked up.
        name: String,
    },

    /// No profile is registered as default.
    #[error("no profile registered as default")]
    DefaultProfileNotFound,

    /// A profile with the same name is already registered.
    #[error("profile \"{name}\" is already registered")]
    ProfileAlreadyRegistered {
        /// The colliding name.
        name: String,
    },

    /// A default profile is already registered.
    #[error(
        "unable to register profile \"{name}\" as default: \
         profile \"{existing}\" is already registered as default"
    )]
    DefaultProfileAlreadyRegistered {
        /// The profile being registered.
        name: String,
        /// The profile already holding the default slot.
        existing: String,
    },

    /// A profile without a name was registered as non-default.
    #[error("profile without a name can not be registered as non-default")]
    ProfileHasNoName,

    /// The registration mixed or omitted the URL and its components.
    #[error(
        "wrong profile arguments: either url or all of \
         (driver, user, password, host, port, database) must be provided"
    )]
    ConflictingProfileParams,

    /// The profile URL could not be parsed.
    #[error("invalid profile url \"{url}\": {reason}")]
    InvalidProfileUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The URL scheme names a driver outside the supported set.
    #[error("unsupported driver \"{scheme}\"")]
    UnsupportedDriver {
        /// The rejected scheme.
        scheme: String,
    },

    /// An operation required an active scope.
    #[error("{scope} is inactive")]
    Inactive {
        /// Which scope variant was addressed.
        scope: ScopeKind,
    },

    /// `open` was called on an already-open scope.
    #[error("{scope} is already open")]
    AlreadyOpen {
        /// Which scope variant was addressed.
        scope: ScopeKind,
    },

    /// The scope is already inside an automatic-mode boundary.
    #[error("{scope} is already inside an automatic-mode boundary")]
    AlreadyInAutomaticMode {
        /// Which scope variant was addressed.
        scope: ScopeKind,
    },

    /// `close` was called while the automatic-mode boundary owns the
    /// scope's lifecycle.
    #[error("{scope} inside an automatic-mode boundary can not be closed explicitly")]
    StillInAutomaticMode {
        /// Which scope variant was addressed.
        scope: ScopeKind,
    },

    /// A savepoint was constructed with itself as its parent.
    #[error("savepoint is not allowed to be its own parent")]
    SavepointSelfParent,

    /// A statement other than insert/update/delete was deferred.
    #[error("only insert, update and delete statements can be deferred")]
    InvalidStatementKind,

    /// An unwind signal escaped every boundary without finding its
    /// target scope.
    #[error("unwind signal escaped every boundary (target {target})")]
    UnconsumedUnwind {
        /// The target the signal never reached.
        target: ScopeId,
    },

    /// Engine error.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

impl CoreError {
    /// Creates an inactive-scope error.
    #[must_use]
    pub fn inactive(scope: ScopeKind) -> Self {
        Self::Inactive { scope }
    }

    /// Creates an invalid-URL error.
    pub fn invalid_profile_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProfileUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_scope_variant() {
        let err = CoreError::inactive(ScopeKind::Transaction);
        assert_eq!(err.to_string(), "transaction is inactive");

        let err = CoreError::AlreadyOpen {
            scope: ScopeKind::Savepoint,
        };
        assert_eq!(err.to_string(), "savepoint is already open");
    }

    #[test]
    fn engine_errors_convert() {
        let err = CoreError::from(EngineError::NoTransaction);
        assert!(matches!(err, CoreError::Engine(_)));
    }

    #[test]
    fn default_collision_message() {
        let err = CoreError::DefaultProfileAlreadyRegistered {
            name: "3".to_owned(),
            existing: "1".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "unable to register profile \"3\" as default: \
             profile \"1\" is already registered as default"
        );
    }
}
