//! The dataset contract consumed by the executor.
//!
//! Storage engines live outside this crate; the executor only needs a
//! deterministic enumeration of row identities and per-row cell content.
//! `InMemoryDataset` is the reference implementation used by tests and by
//! callers that want to query transient data.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{ColumnPath, KnownColumn, RowPath, ValueKind};

/// One versioned cell of a row: a column, a value, and the time at which the
/// value was recorded. A row may carry several versions of the same column;
/// the WHEN filter decides which survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub column: ColumnPath,
    pub value: Value,
    pub ts: DateTime<Utc>,
}

impl Cell {
    pub fn new(column: ColumnPath, value: Value, ts: DateTime<Utc>) -> Self {
        Cell { column, value, ts }
    }
}

/// A queryable dataset.
///
/// `row_paths` must enumerate rows in an order that is deterministic for an
/// unchanged dataset; the executor relies on this for reproducible results
/// and for the offset/limit window on sequential scans.
pub trait Dataset: Send + Sync {
    /// Name the dataset is registered under.
    fn name(&self) -> &str;

    /// Schema known before any row is read, in dataset column order.
    fn known_columns(&self) -> Vec<KnownColumn>;

    /// All row identities, in deterministic order.
    fn row_paths(&self) -> Vec<RowPath>;

    /// Full cell content of one row. Unknown paths yield an empty row.
    fn row_cells(&self, path: &RowPath) -> Vec<Cell>;
}

/// In-memory dataset preserving insertion order of rows and columns.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    name: String,
    column_order: Vec<KnownColumn>,
    column_index: HashMap<ColumnPath, usize>,
    row_order: Vec<RowPath>,
    rows: HashMap<RowPath, Vec<Cell>>,
}

impl InMemoryDataset {
    pub fn new(name: &str) -> Self {
        InMemoryDataset {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Insert a full row at the epoch timestamp. Convenient for data where
    /// cell versions don't matter.
    pub fn add_row(&mut self, path: impl Into<RowPath>, columns: Vec<(&str, Value)>) {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let path = path.into();
        for (column, value) in columns {
            self.add_cell(path.clone(), ColumnPath::parse(column), value, ts);
        }
    }

    /// Insert one cell version.
    pub fn add_cell(
        &mut self,
        path: impl Into<RowPath>,
        column: ColumnPath,
        value: Value,
        ts: DateTime<Utc>,
    ) {
        let path = path.into();
        if !self.column_index.contains_key(&column) {
            let kind = if value.is_number() {
                ValueKind::Numeric
            } else {
                ValueKind::Atom
            };
            self.column_index.insert(column.clone(), self.column_order.len());
            self.column_order.push(KnownColumn::new(column.clone(), kind));
        }
        if !self.rows.contains_key(&path) {
            self.row_order.push(path.clone());
        }
        self.rows
            .entry(path)
            .or_default()
            .push(Cell::new(column, value, ts));
    }

    pub fn row_count(&self) -> usize {
        self.row_order.len()
    }
}

impl Dataset for InMemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    fn known_columns(&self) -> Vec<KnownColumn> {
        self.column_order.clone()
    }

    fn row_paths(&self) -> Vec<RowPath> {
        self.row_order.clone()
    }

    fn row_cells(&self, path: &RowPath) -> Vec<Cell> {
        self.rows.get(path).cloned().unwrap_or_default()
    }
}
