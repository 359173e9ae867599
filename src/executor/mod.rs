//! Statement execution.
//!
//! `QueryScope` holds the registered datasets and dispatches each statement
//! to the executor matching its bound FROM clause: the row iteration engine
//! for a concrete dataset, the grouped executor when grouping or aggregates
//! are involved, the operator pipeline for derived tables, and the
//! constant-time path for statements with no source at all.

pub mod dense;
pub mod grouped;
pub mod iterate;
pub mod no_source;
pub mod pipeline;
pub mod types;

pub use dense::{get_embedding, get_embedding_from_statement, iterate_dense};
pub use grouped::BoundGroupByQuery;
pub use iterate::{iterate_dataset, iterate_dataset_rows};
pub use no_source::{get_validated_row_name, query_without_dataset};
pub use pipeline::{compile_pipeline, PipelineExecutor, PipelineTuple};
pub use types::{
    DenseProcessorFn, EmbeddingRow, ExecutionMode, NamedRow, NamedRowProcessorFn, OnProgressFn,
    RowProcessorFn, PROGRESS_EVERY,
};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::ast::{Expression, SelectStatement, TableExpression};
use crate::dataset::Dataset;
use crate::error::{QueryError, QueryResult};
use crate::path::RowPath;

/// The FROM clause resolved against the scope, exactly once per statement.
pub enum BoundFrom {
    None,
    Dataset {
        dataset: Arc<dyn Dataset>,
        alias: Option<String>,
    },
    SubSelect(Box<SelectStatement>),
}

/// Registered datasets plus the statement-level entry points.
#[derive(Clone, Default)]
pub struct QueryScope {
    datasets: HashMap<String, Arc<dyn Dataset>>,
}

impl QueryScope {
    pub fn new() -> Self {
        QueryScope::default()
    }

    pub fn register(&mut self, dataset: Arc<dyn Dataset>) {
        self.datasets.insert(dataset.name().to_string(), dataset);
    }

    pub fn dataset(&self, name: &str) -> QueryResult<Arc<dyn Dataset>> {
        self.datasets
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::DatasetNotFound(name.to_string()))
    }

    pub(crate) fn bind_from(&self, from: &TableExpression) -> QueryResult<BoundFrom> {
        Ok(match from {
            TableExpression::None => BoundFrom::None,
            TableExpression::Dataset { name, alias } => BoundFrom::Dataset {
                dataset: self.dataset(name)?,
                alias: alias.clone(),
            },
            TableExpression::SubSelect(inner) => BoundFrom::SubSelect(inner.clone()),
        })
    }

    /// Execute a statement and materialize every output row as a
    /// (row path, flat object) pair.
    pub fn query_from_statement(
        &self,
        statement: &SelectStatement,
    ) -> QueryResult<Vec<(RowPath, Value)>> {
        let mut rows = Vec::new();
        self.query_from_statement_streaming(statement, |path, value| {
            rows.push((path, value));
            true
        })?;
        Ok(rows)
    }

    /// Streaming execution: `on_row` is invoked once per output row and may
    /// return false to stop. Returns the completion flag; `Ok(false)` means
    /// the consumer stopped early, which is not an error.
    pub fn query_from_statement_streaming(
        &self,
        statement: &SelectStatement,
        on_row: impl FnMut(RowPath, Value) -> bool + Send,
    ) -> QueryResult<bool> {
        let on_row = Mutex::new(on_row);
        match self.bind_from(&statement.from)? {
            BoundFrom::None => match no_source::query_without_dataset(statement)? {
                Some(row) => {
                    let path = row.path.clone();
                    Ok((&mut *on_row.lock())(path, row.into_value()))
                }
                None => Ok(true),
            },

            BoundFrom::Dataset { dataset, alias } => {
                let grouped = !statement.group_by.is_empty()
                    || statement.having.is_some()
                    || statement.select.contains_aggregate();
                if grouped {
                    self.run_grouped(statement, dataset.as_ref(), alias.as_deref(), &on_row)
                } else {
                    self.run_table_scan(statement, dataset.as_ref(), alias.as_deref(), &on_row)
                }
            }

            BoundFrom::SubSelect(inner) => {
                let mut executor = pipeline::compile_pipeline(statement, self, &inner)?;
                let mut skipped = 0usize;
                let mut emitted = 0usize;
                loop {
                    if let Some(limit) = statement.limit {
                        if emitted >= limit {
                            break;
                        }
                    }
                    let Some(tuple) = executor.take()? else {
                        break;
                    };
                    if skipped < statement.offset {
                        skipped += 1;
                        continue;
                    }
                    if !(&mut *on_row.lock())(tuple.path, tuple.values) {
                        return Ok(false);
                    }
                    emitted += 1;
                }
                Ok(true)
            }
        }
    }

    fn run_grouped(
        &self,
        statement: &SelectStatement,
        dataset: &dyn Dataset,
        alias: Option<&str>,
        on_row: &Mutex<impl FnMut(RowPath, Value) -> bool + Send>,
    ) -> QueryResult<bool> {
        let query = BoundGroupByQuery::bind(
            &statement.select,
            dataset,
            alias,
            &statement.when,
            &statement.where_,
            &statement.group_by,
            statement.having.as_ref(),
            &statement.order_by,
            statement.row_name.as_ref(),
        )?;
        let processor = |row: NamedRow| {
            let path = row.path.clone();
            (&mut *on_row.lock())(path, row.into_value())
        };
        let (completed, _) =
            query.execute(&processor, statement.offset, statement.limit, None)?;
        Ok(completed)
    }

    fn run_table_scan(
        &self,
        statement: &SelectStatement,
        dataset: &dyn Dataset,
        alias: Option<&str>,
        on_row: &Mutex<impl FnMut(RowPath, Value) -> bool + Send>,
    ) -> QueryResult<bool> {
        // The rowName expression rides along as an extra computed value so
        // it is evaluated in the same per-row pass as the projection.
        let calc: Vec<Expression> = statement.row_name.iter().cloned().collect();
        let failed: Mutex<Option<QueryError>> = Mutex::new(None);

        let processor = |row: NamedRow, calcd: Vec<Value>| {
            let path = match calcd.first() {
                Some(name) => match no_source::get_validated_row_name(name) {
                    Ok(path) => path,
                    Err(e) => {
                        *failed.lock() = Some(e);
                        return false;
                    }
                },
                None => row.path.clone(),
            };
            (&mut *on_row.lock())(path, row.into_value())
        };

        let (completed, _) = iterate::iterate_dataset(
            &statement.select,
            dataset,
            alias,
            &statement.when,
            &statement.where_,
            &calc,
            &processor,
            ExecutionMode::Sequential,
            &statement.order_by,
            statement.offset,
            statement.limit,
            None,
        )?;
        if let Some(e) = failed.into_inner() {
            return Err(e);
        }
        Ok(completed)
    }
}
