//! Statement model.
//!
//! The scope layer does not own SQL construction; it only needs enough
//! structure to route statements, classify them for deferral, and drive
//! the in-memory engine. Statements address rows by an integer primary
//! key and carry column values as name/value string pairs.

use std::collections::BTreeMap;

/// Classification of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Inserts a new row.
    Insert,
    /// Updates an existing row.
    Update,
    /// Deletes a row.
    Delete,
    /// Reads rows.
    Select,
}

/// A single row returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Primary key.
    pub id: i64,
    /// Column values by name.
    pub values: BTreeMap<String, String>,
}

impl Row {
    /// Returns the value of a column, if present.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

/// A statement executable by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Inserts a row with the given primary key and column values.
    Insert {
        /// Target table.
        table: String,
        /// Primary key of the new row.
        id: i64,
        /// Column values by name.
        values: BTreeMap<String, String>,
    },
    /// Updates the row with the given primary key. A no-op if the row
    /// does not exist.
    Update {
        /// Target table.
        table: String,
        /// Primary key of the row to update.
        id: i64,
        /// Column values to overwrite.
        values: BTreeMap<String, String>,
    },
    /// Deletes the row with the given primary key. A no-op if the row
    /// does not exist.
    Delete {
        /// Target table.
        table: String,
        /// Primary key of the row to delete.
        id: i64,
    },
    /// Reads one row by primary key, or the whole table.
    Select {
        /// Target table.
        table: String,
        /// Primary key to select, or `None` for all rows.
        id: Option<i64>,
    },
}

fn collect(values: &[(&str, &str)]) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(column, value)| ((*column).to_owned(), (*value).to_owned()))
        .collect()
}

impl Statement {
    /// Creates an insert statement.
    #[must_use]
    pub fn insert(table: impl Into<String>, id: i64, values: &[(&str, &str)]) -> Self {
        Self::Insert {
            table: table.into(),
            id,
            values: collect(values),
        }
    }

    /// Creates an update statement.
    #[must_use]
    pub fn update(table: impl Into<String>, id: i64, values: &[(&str, &str)]) -> Self {
        Self::Update {
            table: table.into(),
            id,
            values: collect(values),
        }
    }

    /// Creates a delete statement.
    #[must_use]
    pub fn delete(table: impl Into<String>, id: i64) -> Self {
        Self::Delete {
            table: table.into(),
            id,
        }
    }

    /// Creates a select statement for a single row.
    #[must_use]
    pub fn select(table: impl Into<String>, id: i64) -> Self {
        Self::Select {
            table: table.into(),
            id: Some(id),
        }
    }

    /// Creates a select statement for a whole table.
    #[must_use]
    pub fn select_all(table: impl Into<String>) -> Self {
        Self::Select {
            table: table.into(),
            id: None,
        }
    }

    /// Returns the statement classification.
    #[must_use]
    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Insert { .. } => StatementKind::Insert,
            Self::Update { .. } => StatementKind::Update,
            Self::Delete { .. } => StatementKind::Delete,
            Self::Select { .. } => StatementKind::Select,
        }
    }

    /// Returns true for insert, update and delete statements.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.kind() != StatementKind::Select
    }

    /// Returns the table the statement addresses.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Select { table, .. } => table,
        }
    }
}
