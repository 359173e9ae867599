//! Dense extraction: project each matching row into a fixed-width `Vec<f64>`
//! feature vector positioned by the bound output schema.
//!
//! Two shapes are offered. `iterate_dense` streams feature vectors to a
//! processor. `get_embedding` materializes the whole embedding, choosing
//! between a parallel scan (re-sorted into a stable order afterwards) and a
//! sequential scan when a result window or ordering makes order matter.

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::ast::{
    Expression, OrderByExpression, SelectExpression, SelectStatement, WhenExpression,
};
use crate::binding::{bind_select, extract_double_embedding, BindingScope};
use crate::dataset::Dataset;
use crate::error::{QueryError, QueryResult};
use crate::path::{schema_surface, KnownColumn};

use super::iterate::iterate_dataset;
use super::types::{
    DenseProcessorFn, EmbeddingRow, ExecutionMode, NamedRow, OnProgressFn,
};
use super::{BoundFrom, QueryScope};

/// Bind the projection and fail early if it would produce no columns.
fn bind_dense_schema(
    select: &SelectExpression,
    dataset: &dyn Dataset,
    alias: Option<&str>,
) -> QueryResult<Vec<KnownColumn>> {
    let scope = BindingScope::for_dataset(dataset, alias);
    let bound = bind_select(select, &scope)?;
    if bound.schema.is_empty() {
        return Err(QueryError::NoColumnsMatched {
            select: select.surface(),
            row_schema: schema_surface(&dataset.known_columns()),
        });
    }
    Ok(bound.schema)
}

/// Stream dense feature vectors to a processor.
///
/// The row index passed to the processor is the position in the scan under
/// sequential execution and -1 under parallel execution, where no position
/// is meaningful.
#[allow(clippy::too_many_arguments)]
pub fn iterate_dense(
    select: &SelectExpression,
    dataset: &dyn Dataset,
    alias: Option<&str>,
    when: &WhenExpression,
    where_: &Expression,
    calc: &[Expression],
    processor: &DenseProcessorFn<'_>,
    mode: ExecutionMode,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<(bool, Vec<KnownColumn>)> {
    let schema = bind_dense_schema(select, dataset, alias)?;
    let extract = extract_double_embedding(&schema);

    let next_index = AtomicI64::new(0);
    let adapted = move |row: NamedRow, calcd: Vec<Value>| {
        let features = extract(&row.columns);
        let index = match mode {
            ExecutionMode::Sequential => next_index.fetch_add(1, Ordering::Relaxed),
            ExecutionMode::Parallel => -1,
        };
        processor(row.hash, &row.path, index, features, calcd)
    };

    let (completed, _) = iterate_dataset(
        select,
        dataset,
        alias,
        when,
        where_,
        calc,
        &adapted,
        mode,
        &OrderByExpression::nothing(),
        0,
        None,
        on_progress,
    )?;
    Ok((completed, schema))
}

/// Materialize the embedding of every matching row.
///
/// Without ordering or a result window the scan runs in parallel and the
/// output is re-sorted by (row hash, row path), so repeated calls over an
/// unchanged dataset return identical output. With an offset, a limit or an
/// orderBy the scan runs sequentially and rows keep scan order, with `index`
/// recording each row's position.
///
/// Each `calc` expression is evaluated per row and carried in `extras`,
/// alongside the features rather than inside them.
///
/// `max_dimensions` truncates the output schema; it never pads.
#[allow(clippy::too_many_arguments)]
pub fn get_embedding(
    select: &SelectExpression,
    dataset: &dyn Dataset,
    alias: Option<&str>,
    when: &WhenExpression,
    where_: &Expression,
    calc: &[Expression],
    order_by: &OrderByExpression,
    offset: usize,
    limit: Option<usize>,
    max_dimensions: Option<usize>,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<(Vec<EmbeddingRow>, Vec<KnownColumn>)> {
    let mut schema = bind_dense_schema(select, dataset, alias)?;
    if let Some(max) = max_dimensions {
        if max < schema.len() {
            schema.truncate(max);
        }
    }
    let dimensions = schema.len();
    let extract = extract_double_embedding(&schema);

    let out: Mutex<Vec<EmbeddingRow>> = Mutex::new(Vec::new());
    let sequential = offset != 0 || limit.is_some() || !order_by.is_empty();

    if sequential {
        let next_index = AtomicI64::new(0);
        let processor = |row: NamedRow, calcd: Vec<Value>| {
            let features = extract(&row.columns);
            out.lock().push(EmbeddingRow {
                hash: row.hash,
                path: row.path,
                index: next_index.fetch_add(1, Ordering::Relaxed),
                features,
                extras: calcd,
            });
            true
        };
        iterate_dataset(
            select,
            dataset,
            alias,
            when,
            where_,
            calc,
            &processor,
            ExecutionMode::Sequential,
            order_by,
            offset,
            limit,
            on_progress,
        )?;
    } else {
        let processor = |row: NamedRow, calcd: Vec<Value>| {
            let features = extract(&row.columns);
            out.lock().push(EmbeddingRow {
                hash: row.hash,
                path: row.path,
                index: -1,
                features,
                extras: calcd,
            });
            true
        };
        iterate_dataset(
            select,
            dataset,
            alias,
            when,
            where_,
            calc,
            &processor,
            ExecutionMode::Parallel,
            &OrderByExpression::nothing(),
            0,
            None,
            on_progress,
        )?;
    }

    let mut rows = out.into_inner();
    if !sequential {
        rows.sort_by(|a, b| (a.hash, &a.path).cmp(&(b.hash, &b.path)));
    }
    debug_assert!(rows.iter().all(|r| r.features.len() == dimensions));

    tracing::debug!(
        dataset = dataset.name(),
        rows = rows.len(),
        dimensions,
        "embedding extracted"
    );
    Ok((rows, schema))
}

/// Statement-level embedding extraction. The statement must read from a
/// named dataset; grouping is not meaningful for dense output.
pub fn get_embedding_from_statement(
    statement: &SelectStatement,
    scope: &QueryScope,
    max_dimensions: Option<usize>,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<(Vec<EmbeddingRow>, Vec<KnownColumn>)> {
    if !statement.group_by.is_empty() {
        return Err(QueryError::ExecutionError(
            "GROUP BY cannot be used in an embedding query".to_string(),
        ));
    }
    match scope.bind_from(&statement.from)? {
        BoundFrom::Dataset { dataset, alias } => get_embedding(
            &statement.select,
            dataset.as_ref(),
            alias.as_deref(),
            &statement.when,
            &statement.where_,
            &[],
            &statement.order_by,
            statement.offset,
            statement.limit,
            max_dimensions,
            on_progress,
        ),
        _ => Err(QueryError::DatasetRequired),
    }
}
