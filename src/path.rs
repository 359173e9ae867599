//! Row and column identity.
//!
//! A `RowPath` is the structured, human-meaningful identity of a row; a
//! `RowHash` is a deterministic sort key derived from it, used to restore a
//! stable output order after parallel execution. A `ColumnPath` names one
//! output column, and a `KnownColumn` pairs it with its inferred value kind.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured row identity: an ordered sequence of path segments.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowPath(Vec<String>);

impl RowPath {
    pub fn new(segments: Vec<String>) -> Self {
        RowPath(segments)
    }

    /// A single-segment path.
    pub fn atom(segment: impl Into<String>) -> Self {
        RowPath(vec![segment.into()])
    }

    /// Parse a dotted path string ("a.b.c" -> [a, b, c]).
    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return RowPath(Vec::new());
        }
        RowPath(path.split('.').map(|s| s.to_string()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deterministic, content-only hash of this path. Equal paths always
    /// produce equal hashes; the hash does not depend on insertion order or
    /// any per-process state.
    pub fn hash(&self) -> RowHash {
        let mut buf = Vec::with_capacity(self.0.iter().map(|s| s.len() + 8).sum());
        for segment in &self.0 {
            buf.extend_from_slice(&(segment.len() as u64).to_le_bytes());
            buf.extend_from_slice(segment.as_bytes());
        }
        RowHash(seahash::hash(&buf))
    }

    /// Coerce an evaluated expression value into a row path.
    ///
    /// Accepts a string (split on '.'), a number or boolean (single atom), or
    /// an array of atoms. Returns `None` for anything else.
    pub fn coerce_from_value(value: &Value) -> Option<RowPath> {
        match value {
            Value::String(s) => Some(RowPath::parse(s)),
            Value::Number(n) => Some(RowPath::atom(n.to_string())),
            Value::Bool(b) => Some(RowPath::atom(b.to_string())),
            Value::Array(items) => {
                let mut segments = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => segments.push(s.clone()),
                        Value::Number(n) => segments.push(n.to_string()),
                        Value::Bool(b) => segments.push(b.to_string()),
                        _ => return None,
                    }
                }
                Some(RowPath(segments))
            }
            _ => None,
        }
    }
}

impl fmt::Display for RowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for RowPath {
    fn from(path: &str) -> Self {
        RowPath::parse(path)
    }
}

/// Deterministic sort key derived from a `RowPath`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RowHash(pub u64);

/// Column identity within a row schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnPath(Vec<String>);

impl ColumnPath {
    pub fn new(segments: Vec<String>) -> Self {
        ColumnPath(segments)
    }

    pub fn atom(segment: impl Into<String>) -> Self {
        ColumnPath(vec![segment.into()])
    }

    pub fn parse(path: &str) -> Self {
        if path.is_empty() {
            return ColumnPath(Vec::new());
        }
        ColumnPath(path.split('.').map(|s| s.to_string()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Strip a leading alias segment ("x.a" with alias "x" -> "a").
    pub fn without_alias(&self, alias: &str) -> Option<ColumnPath> {
        match self.0.first() {
            Some(first) if first == alias && self.0.len() > 1 => {
                Some(ColumnPath(self.0[1..].to_vec()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for ColumnPath {
    fn from(path: &str) -> Self {
        ColumnPath::parse(path)
    }
}

/// Kinds of values a column is known to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Numeric atom, usable in a dense embedding.
    Numeric,
    /// Any other scalar atom (string, boolean, null).
    Atom,
    /// Nested row value.
    Row,
}

/// One column of a known result schema: path plus inferred value kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownColumn {
    pub column: ColumnPath,
    pub kind: ValueKind,
}

impl KnownColumn {
    pub fn new(column: ColumnPath, kind: ValueKind) -> Self {
        KnownColumn { column, kind }
    }
}

/// Render a schema as a comma-separated column list, for error messages.
pub fn schema_surface(columns: &[KnownColumn]) -> String {
    columns
        .iter()
        .map(|c| c.column.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_row_path_display() {
        let path = RowPath::parse("users.alice");
        assert_eq!(path.to_string(), "users.alice");
        assert_eq!(path.segments().len(), 2);
    }

    #[test]
    fn test_row_hash_is_pure() {
        let a = RowPath::parse("a.b.c");
        let b = RowPath::parse("a.b.c");
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), RowPath::parse("a.b.d").hash());
    }

    #[test]
    fn test_row_hash_segment_boundaries() {
        // "ab" + "c" must not collide with "a" + "bc".
        let a = RowPath::new(vec!["ab".to_string(), "c".to_string()]);
        let b = RowPath::new(vec!["a".to_string(), "bc".to_string()]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_coerce_from_value() {
        assert_eq!(
            RowPath::coerce_from_value(&json!("x.y")),
            Some(RowPath::parse("x.y"))
        );
        assert_eq!(
            RowPath::coerce_from_value(&json!(7)),
            Some(RowPath::atom("7"))
        );
        assert_eq!(
            RowPath::coerce_from_value(&json!(["a", 1])),
            Some(RowPath::new(vec!["a".to_string(), "1".to_string()]))
        );
        assert_eq!(RowPath::coerce_from_value(&json!({"k": 1})), None);
        assert_eq!(RowPath::coerce_from_value(&json!(null)), None);
    }

    #[test]
    fn test_column_path_without_alias() {
        let col = ColumnPath::parse("x.amount");
        assert_eq!(col.without_alias("x"), Some(ColumnPath::parse("amount")));
        assert_eq!(col.without_alias("y"), None);
        assert_eq!(ColumnPath::parse("x").without_alias("x"), None);
    }
}
