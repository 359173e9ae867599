//! Row iteration engine.
//!
//! Equivalent to SELECT (select) FROM (dataset) WHEN (when) WHERE (where):
//! each matching row is built (predicate, temporal filter, projection, extra
//! computed expressions) and handed to a caller-supplied processor. The
//! caller picks the execution mode; ordering, offset and limit always force
//! a sequential pass so the result window is taken from a stable global
//! order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::Value;

use crate::ast::{Expression, OrderByExpression, SelectExpression, SortOrder, WhenExpression};
use crate::binding::{
    bind_expression, bind_select, bind_when, BindingScope, BoundExpression, RowScope,
};
use crate::dataset::Dataset;
use crate::error::{QueryError, QueryResult};
use crate::path::{KnownColumn, RowPath};
use crate::value::{compare_values, to_bool};

use super::types::{
    progress_record, ExecutionMode, NamedRow, NamedRowProcessorFn, OnProgressFn, RowProcessorFn,
    PROGRESS_EVERY,
};

/// Everything bound against the dataset scope before the scan starts.
struct BoundScan {
    where_: BoundExpression,
    when: crate::binding::BoundWhen,
    select: crate::binding::BoundSelect,
    calc: Vec<BoundExpression>,
    order_by: Vec<(BoundExpression, SortOrder)>,
}

impl BoundScan {
    fn bind(
        select: &SelectExpression,
        scope: &BindingScope,
        when: &WhenExpression,
        where_: &Expression,
        calc: &[Expression],
        order_by: &OrderByExpression,
    ) -> QueryResult<Self> {
        Ok(BoundScan {
            where_: bind_expression(where_, scope)?,
            when: bind_when(when, scope)?,
            select: bind_select(select, scope)?,
            calc: calc
                .iter()
                .map(|c| bind_expression(c, scope))
                .collect::<QueryResult<_>>()?,
            order_by: order_by
                .clauses
                .iter()
                .map(|(e, o)| Ok((bind_expression(e, scope)?, *o)))
                .collect::<QueryResult<_>>()?,
        })
    }

    /// Build one output row, or None if the predicate rejects it. The third
    /// element holds the evaluated orderBy keys (empty without orderBy).
    fn build_row(
        &self,
        dataset: &dyn Dataset,
        path: &RowPath,
    ) -> QueryResult<Option<(NamedRow, Vec<Value>, Vec<Value>)>> {
        let mut cells = dataset.row_cells(path);

        {
            let scope = RowScope::new(path, &cells);
            if !to_bool(&(self.where_)(&scope)?) {
                return Ok(None);
            }
        }

        self.when.filter_in_place(path, &mut cells)?;

        let scope = RowScope::new(path, &cells);
        let columns = self.select.evaluate(&scope)?;
        let calcd: Vec<Value> = self
            .calc
            .iter()
            .map(|c| c(&scope))
            .collect::<QueryResult<_>>()?;
        let order_keys: Vec<Value> = self
            .order_by
            .iter()
            .map(|(e, _)| e(&scope))
            .collect::<QueryResult<_>>()?;

        Ok(Some((
            NamedRow::new(path.clone(), columns),
            calcd,
            order_keys,
        )))
    }
}

/// Iterate a dataset, invoking the processor for each matching row.
///
/// Returns the completion flag (false means the processor or the progress
/// callback stopped the scan early) and the inferred output schema.
#[allow(clippy::too_many_arguments)]
pub fn iterate_dataset(
    select: &SelectExpression,
    dataset: &dyn Dataset,
    alias: Option<&str>,
    when: &WhenExpression,
    where_: &Expression,
    calc: &[Expression],
    processor: &RowProcessorFn<'_>,
    mode: ExecutionMode,
    order_by: &OrderByExpression,
    offset: usize,
    limit: Option<usize>,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<(bool, Vec<KnownColumn>)> {
    let scope = BindingScope::for_dataset(dataset, alias);
    let bound = BoundScan::bind(select, &scope, when, where_, calc, order_by)?;
    let schema = bound.select.schema.clone();

    let rows = dataset.row_paths();
    tracing::debug!(
        dataset = dataset.name(),
        rows = rows.len(),
        mode = ?mode,
        "starting dataset scan"
    );

    if !order_by.is_empty() {
        let completed = iterate_ordered(&bound, dataset, &rows, processor, offset, limit, on_progress)?;
        return Ok((completed, schema));
    }

    let windowed = offset > 0 || limit.is_some();
    if windowed || mode == ExecutionMode::Sequential {
        let completed =
            iterate_sequential(&bound, dataset, &rows, processor, offset, limit, on_progress)?;
        return Ok((completed, schema));
    }

    let completed = iterate_parallel(&bound, dataset, &rows, processor, on_progress)?;
    Ok((completed, schema))
}

/// Rows-only variant: adapts a processor that ignores extra computed values.
#[allow(clippy::too_many_arguments)]
pub fn iterate_dataset_rows(
    select: &SelectExpression,
    dataset: &dyn Dataset,
    alias: Option<&str>,
    when: &WhenExpression,
    where_: &Expression,
    processor: &NamedRowProcessorFn<'_>,
    mode: ExecutionMode,
    order_by: &OrderByExpression,
    offset: usize,
    limit: Option<usize>,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<(bool, Vec<KnownColumn>)> {
    let adapted = move |row: NamedRow, _calcd: Vec<Value>| processor(row);
    iterate_dataset(
        select,
        dataset,
        alias,
        when,
        where_,
        &[],
        &adapted,
        mode,
        order_by,
        offset,
        limit,
        on_progress,
    )
}

/// Materialize matching rows, stable-sort by the bound orderBy (ties broken
/// by row path), then feed the requested window sequentially.
fn iterate_ordered(
    bound: &BoundScan,
    dataset: &dyn Dataset,
    rows: &[RowPath],
    processor: &RowProcessorFn<'_>,
    offset: usize,
    limit: Option<usize>,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<bool> {
    let mut materialized = Vec::new();
    for (done, path) in rows.iter().enumerate() {
        if !report_progress(on_progress, done, rows.len()) {
            return Ok(false);
        }
        if let Some(built) = bound.build_row(dataset, path)? {
            materialized.push(built);
        }
    }

    materialized.sort_by(|(row_a, _, keys_a), (row_b, _, keys_b)| {
        for (i, (_, order)) in bound.order_by.iter().enumerate() {
            let cmp = compare_values(&keys_a[i], &keys_b[i]);
            if cmp != std::cmp::Ordering::Equal {
                return match order {
                    SortOrder::Ascending => cmp,
                    SortOrder::Descending => cmp.reverse(),
                };
            }
        }
        row_a.path.cmp(&row_b.path)
    });

    let end = limit
        .map(|l| offset.saturating_add(l).min(materialized.len()))
        .unwrap_or(materialized.len());
    for (row, calcd, _) in materialized
        .drain(..)
        .skip(offset.min(end))
        .take(end.saturating_sub(offset))
    {
        if !processor(row, calcd) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// One row at a time in dataset order; the offset/limit window is applied
/// to matching rows as they stream past, so the scan can stop early.
fn iterate_sequential(
    bound: &BoundScan,
    dataset: &dyn Dataset,
    rows: &[RowPath],
    processor: &RowProcessorFn<'_>,
    offset: usize,
    limit: Option<usize>,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<bool> {
    let mut matched = 0usize;
    let mut emitted = 0usize;
    for (done, path) in rows.iter().enumerate() {
        if !report_progress(on_progress, done, rows.len()) {
            return Ok(false);
        }
        if let Some(limit) = limit {
            if emitted >= limit {
                break;
            }
        }
        let Some((row, calcd, _)) = bound.build_row(dataset, path)? else {
            continue;
        };
        matched += 1;
        if matched <= offset {
            continue;
        }
        if !processor(row, calcd) {
            return Ok(false);
        }
        emitted += 1;
    }
    Ok(true)
}

/// Worker-pool fan-out. No ordering guarantee; the processor declared it
/// commutes across rows. Once a stop signal is observed no further row is
/// dispatched, though rows already in flight may still complete (their
/// results are discarded by the processor contract, not by this engine).
fn iterate_parallel(
    bound: &BoundScan,
    dataset: &dyn Dataset,
    rows: &[RowPath],
    processor: &RowProcessorFn<'_>,
    on_progress: Option<&OnProgressFn<'_>>,
) -> QueryResult<bool> {
    let stop = AtomicBool::new(false);
    let halted = AtomicBool::new(false);
    let failed: Mutex<Option<QueryError>> = Mutex::new(None);
    let done = AtomicUsize::new(0);

    rows.par_iter().for_each(|path| {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match bound.build_row(dataset, path) {
            Err(e) => {
                let mut guard = failed.lock();
                if guard.is_none() {
                    *guard = Some(e);
                }
                stop.store(true, Ordering::Relaxed);
            }
            Ok(None) => {}
            Ok(Some((row, calcd, _))) => {
                if !processor(row, calcd) {
                    halted.store(true, Ordering::Relaxed);
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }
        let n = done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % PROGRESS_EVERY == 0 {
            if let Some(cb) = on_progress {
                if !cb(&progress_record(n, rows.len())) {
                    halted.store(true, Ordering::Relaxed);
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }
    });

    if let Some(e) = failed.into_inner() {
        return Err(e);
    }
    Ok(!halted.load(Ordering::Relaxed))
}

/// Invoke the progress callback at the configured cadence. Returns false
/// when the callback asks to stop.
fn report_progress(on_progress: Option<&OnProgressFn<'_>>, done: usize, total: usize) -> bool {
    if done > 0 && done % PROGRESS_EVERY == 0 {
        if let Some(cb) = on_progress {
            return cb(&progress_record(done, total));
        }
    }
    true
}
