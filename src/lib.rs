//! denseql: query-execution core for analytic datasets.
//!
//! Executes already-parsed SELECT statements (projection, temporal WHEN
//! filter, WHERE predicate, GROUP BY, HAVING, ordering and a result window)
//! against any storage engine implementing the [`Dataset`] trait. Besides
//! named result rows, matching rows can be extracted as fixed-width dense
//! embeddings for numeric consumers.
//!
//! There is no parser and no storage here: statements arrive as
//! [`SelectStatement`] values and data comes from registered [`Dataset`]
//! handles ([`InMemoryDataset`] is the bundled reference implementation).
//!
//! ```
//! use denseql::{InMemoryDataset, QueryScope, SelectStatement};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let mut ds = InMemoryDataset::new("people");
//! ds.add_row("alice", vec![("age", json!(34))]);
//! ds.add_row("bob", vec![("age", json!(27))]);
//!
//! let mut scope = QueryScope::new();
//! scope.register(Arc::new(ds));
//!
//! let rows = scope
//!     .query_from_statement(&SelectStatement::from_dataset("people"))
//!     .unwrap();
//! assert_eq!(rows.len(), 2);
//! assert_eq!(rows[0].1, json!({"age": 34}));
//! ```

pub mod ast;
pub mod binding;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod path;
pub mod value;

pub use ast::{
    BinaryOperator, Expression, OrderByExpression, SelectClause, SelectExpression,
    SelectStatement, SortOrder, TableExpression, UnaryOperator, WhenExpression,
};
pub use dataset::{Cell, Dataset, InMemoryDataset};
pub use error::{QueryError, QueryResult};
pub use executor::{
    get_embedding, get_embedding_from_statement, iterate_dataset, iterate_dataset_rows,
    iterate_dense, query_without_dataset, BoundFrom, BoundGroupByQuery, EmbeddingRow,
    ExecutionMode, NamedRow, PipelineExecutor, PipelineTuple, QueryScope,
};
pub use path::{ColumnPath, KnownColumn, RowHash, RowPath, ValueKind};
