//! # txscope Engine
//!
//! Relational engine boundary for txscope.
//!
//! This crate defines the contracts the scope layer consumes and an
//! in-memory engine that honors them:
//!
//! - [`Connection`] / [`Connector`] - transaction, savepoint and
//!   statement execution boundary
//! - [`Statement`] - the minimal statement model (insert, update,
//!   delete, select over integer-keyed rows)
//! - [`Session`] - the stateful per-connection handle with flush
//!   invalidation semantics
//! - [`MemoryConnector`] / [`MemoryConnection`] - an in-memory engine
//!   with real transaction, savepoint and poisoning semantics
//!
//! ## Design Principles
//!
//! - The engine is an **external collaborator**: it executes what it is
//!   given and reports failures; it never retries and never interprets
//!   scope lifecycles
//! - A failed statement poisons its transaction - the scope layer's
//!   liveness check detects this and self-heals
//! - `rollback` is unconditionally safe so cleanup paths never have to
//!   ask before releasing
//!
//! ## Example
//!
//! ```rust
//! use txscope_engine::{Connector, MemoryConnector, Session, Statement};
//!
//! let connector = MemoryConnector::new();
//! let conn = connector.connect("sqlite://example").unwrap();
//! conn.begin().unwrap();
//! let session = Session::new(conn);
//! session.execute(&Statement::insert("t", 1, &[("value", "1")])).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod memory;
mod session;
mod statement;

pub use connection::{Connection, Connector};
pub use error::{EngineError, EngineResult};
pub use memory::{MemoryConnection, MemoryConnector};
pub use session::Session;
pub use statement::{Row, Statement, StatementKind};
