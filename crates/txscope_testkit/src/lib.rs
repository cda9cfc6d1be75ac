//! # txscope Testkit
//!
//! Test utilities for txscope.
//!
//! This crate provides:
//! - A harness wiring a profile registry to the in-memory engine
//! - Statement builders for the harness table
//! - A tracing initializer for test output
//!
//! ## Usage
//!
//! ```rust
//! use txscope_testkit::prelude::*;
//! use txscope_core::{Interrupt, Scope};
//!
//! let harness = TestHarness::new();
//! let txn = harness.transaction();
//! txn.scope(|txn| {
//!     txn.session()?.execute(&insert(1, "1"))?;
//!     Ok(())
//! })
//! .map_err(Interrupt::into_error)
//! .unwrap();
//! assert_eq!(harness.committed(1).as_deref(), Some("1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
}

pub use fixtures::*;
