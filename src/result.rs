//! Text rendering of a query's result set.

use serde::Serialize;

/// Stands in for SQL NULL in a rendered result set.
pub const NULL_MARKER: &str = "\\N";

/// A result set rendered as text.
///
/// `columns` is the header row; every entry of `rows` has the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// The header followed by the data rows, in the order the server sent them.
    pub fn into_rows(self) -> Vec<Vec<String>> {
        let mut table = Vec::with_capacity(self.rows.len() + 1);
        table.push(self.columns);
        table.extend(self.rows);
        table
    }
}
