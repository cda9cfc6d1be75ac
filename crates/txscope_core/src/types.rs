//! Core type definitions for txscope.

use std::fmt;
use uuid::Uuid;

/// Unique identity of a scope within the process.
///
/// Scope IDs are the target identity carried by unwind signals; the
/// boundary whose ID matches a signal's target consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(Uuid);

impl ScopeId {
    /// Creates a fresh, unique scope ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope:{}", self.0.simple())
    }
}

/// Which variant of scope an operation was invoked on.
///
/// Carried by lifecycle-misuse errors so "transaction is inactive" and
/// "savepoint is inactive" stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// The root scope: the transaction itself.
    Transaction,
    /// A nested scope: one savepoint level.
    Savepoint,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction => write!(f, "transaction"),
            Self::Savepoint => write!(f, "savepoint"),
        }
    }
}

/// The opaque token naming one SAVEPOINT level.
///
/// Generated once at savepoint construction, unique for the process
/// lifetime of the connection, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SavepointName(String);

impl SavepointName {
    /// Generates a fresh, unique savepoint name.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sp_{}", Uuid::new_v4().simple()))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SavepointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_ids_are_unique() {
        assert_ne!(ScopeId::new(), ScopeId::new());
    }

    #[test]
    fn savepoint_names_are_unique_and_prefixed() {
        let a = SavepointName::generate();
        let b = SavepointName::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("sp_"));
    }

    #[test]
    fn scope_kind_display() {
        assert_eq!(ScopeKind::Transaction.to_string(), "transaction");
        assert_eq!(ScopeKind::Savepoint.to_string(), "savepoint");
    }
}
