//! Shared executor types.

use serde::Serialize;
use serde_json::Value;

use crate::path::{ColumnPath, RowHash, RowPath};

/// How the iteration engine may schedule per-row work.
///
/// This is an explicit parameter at every call site: a caller passing
/// `Parallel` declares that its row processor commutes across rows (and
/// guards its own shared state). Order-sensitive callers pass `Sequential`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// A materialized result row: identity plus ordered output columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedRow {
    pub path: RowPath,
    pub hash: RowHash,
    pub columns: Vec<(ColumnPath, Value)>,
}

impl NamedRow {
    pub fn new(path: RowPath, columns: Vec<(ColumnPath, Value)>) -> Self {
        let hash = path.hash();
        NamedRow {
            path,
            hash,
            columns,
        }
    }

    /// Flatten into a plain object keyed by column path strings.
    pub fn into_value(self) -> Value {
        let mut obj = serde_json::Map::new();
        for (column, value) in self.columns {
            obj.insert(column.to_string(), value);
        }
        Value::Object(obj)
    }
}

/// One row of dense extraction output. `index` is the scan position under
/// sequential extraction and -1 when the position is not meaningful.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRow {
    pub hash: RowHash,
    pub path: RowPath,
    pub index: i64,
    pub features: Vec<f64>,
    pub extras: Vec<Value>,
}

/// Per-row processor for the iteration engine. Receives the built row plus
/// the values of any extra computed expressions. Returning false stops the
/// iteration cooperatively; it is not an error.
pub type RowProcessorFn<'a> = dyn Fn(NamedRow, Vec<Value>) -> bool + Sync + 'a;

/// Rows-only processor, for callers that don't use extra computed values.
pub type NamedRowProcessorFn<'a> = dyn Fn(NamedRow) -> bool + Sync + 'a;

/// Per-row processor for dense extraction.
pub type DenseProcessorFn<'a> =
    dyn Fn(RowHash, &RowPath, i64, Vec<f64>, Vec<Value>) -> bool + Sync + 'a;

/// Progress callback, invoked with a JSON record every `PROGRESS_EVERY`
/// processed rows. Returning false stops the scan cooperatively.
pub type OnProgressFn<'a> = dyn Fn(&Value) -> bool + Sync + 'a;

pub const PROGRESS_EVERY: usize = 1000;

/// Build the progress record passed to `OnProgressFn`.
pub(crate) fn progress_record(rows_done: usize, rows_total: usize) -> Value {
    serde_json::json!({
        "rowsDone": rows_done,
        "rowsTotal": rows_total,
    })
}
