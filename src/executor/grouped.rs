//! GROUP BY execution.
//!
//! Rows are scanned once and bucketed by the evaluated grouping key; every
//! output expression is then evaluated once per group. An expression is
//! valid in group context when it is built from grouping keys, literals and
//! aggregate function calls; a bare column reference outside those is a
//! statement error raised at bind time.

use std::collections::HashMap;

use serde_json::Value;

use crate::ast::{
    is_aggregate_function, Expression, OrderByExpression, SelectClause, SelectExpression,
    SortOrder, WhenExpression,
};
use crate::binding::{
    bind_expression, bind_when, call_builtin, infer_kind, BindingScope, BoundExpression,
    BoundWhen, RowScope,
};
use crate::dataset::{Cell, Dataset};
use crate::error::{QueryError, QueryResult};
use crate::path::{KnownColumn, RowPath};
use crate::value::{
    compare_values, evaluate_binary_op, evaluate_unary_op, number_from_f64, to_bool,
};

use super::types::{progress_record, NamedRow, NamedRowProcessorFn, OnProgressFn, PROGRESS_EVERY};

/// One bucket: the evaluated key plus the member rows, kept with their cell
/// content so aggregate arguments can be evaluated per member.
struct Group {
    key_values: Vec<Value>,
    members: Vec<(RowPath, Vec<Cell>)>,
}

/// A GROUP BY query bound against one dataset, ready to execute.
pub struct BoundGroupByQuery<'a> {
    dataset: &'a dyn Dataset,
    scope: BindingScope,
    select: SelectExpression,
    group_by: Vec<Expression>,
    having: Option<Expression>,
    order_by: OrderByExpression,
    row_name: Option<Expression>,
    where_: BoundExpression,
    when: BoundWhen,
    key_exprs: Vec<BoundExpression>,
    schema: Vec<KnownColumn>,
}

impl<'a> BoundGroupByQuery<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn bind(
        select: &SelectExpression,
        dataset: &'a dyn Dataset,
        alias: Option<&str>,
        when: &WhenExpression,
        where_: &Expression,
        group_by: &[Expression],
        having: Option<&Expression>,
        order_by: &OrderByExpression,
        row_name: Option<&Expression>,
    ) -> QueryResult<Self> {
        let scope = BindingScope::for_dataset(dataset, alias);

        if select.has_wildcard() {
            return Err(QueryError::WildcardWithGroupBy);
        }

        let mut schema = Vec::new();
        for clause in &select.clauses {
            let SelectClause::Expr { expr, alias } = clause else {
                unreachable!("wildcard rejected above");
            };
            check_grouped(expr, group_by, &scope)?;
            schema.push(KnownColumn::new(alias.clone(), infer_kind(expr, &scope)));
        }
        if let Some(having) = having {
            check_grouped(having, group_by, &scope)?;
        }
        for (expr, _) in &order_by.clauses {
            check_grouped(expr, group_by, &scope)?;
        }
        if let Some(row_name) = row_name {
            check_grouped(row_name, group_by, &scope)?;
        }

        let key_exprs = group_by
            .iter()
            .map(|e| bind_expression(e, &scope))
            .collect::<QueryResult<_>>()?;

        Ok(BoundGroupByQuery {
            dataset,
            where_: bind_expression(where_, &scope)?,
            when: bind_when(when, &scope)?,
            key_exprs,
            schema,
            scope,
            select: select.clone(),
            group_by: group_by.to_vec(),
            having: having.cloned(),
            order_by: order_by.clone(),
            row_name: row_name.cloned(),
        })
    }

    /// Execute, feeding one output row per surviving group to the processor
    /// in key order (or the requested ordering). Returns the completion flag
    /// and the output schema.
    pub fn execute(
        &self,
        processor: &NamedRowProcessorFn<'_>,
        offset: usize,
        limit: Option<usize>,
        on_progress: Option<&OnProgressFn<'_>>,
    ) -> QueryResult<(bool, Vec<KnownColumn>)> {
        let groups = match self.scan_groups(on_progress)? {
            Some(groups) => groups,
            None => return Ok((false, self.schema.clone())),
        };
        tracing::debug!(
            dataset = self.dataset.name(),
            groups = groups.len(),
            "grouping scan done"
        );

        let mut rows = Vec::new();
        for group in &groups {
            if let Some(having) = &self.having {
                if !to_bool(&self.evaluate_grouped(having, group)?) {
                    continue;
                }
            }

            let mut columns = Vec::new();
            for clause in &self.select.clauses {
                let SelectClause::Expr { expr, alias } = clause else {
                    unreachable!("wildcard rejected at bind");
                };
                columns.push((alias.clone(), self.evaluate_grouped(expr, group)?));
            }

            let path = match &self.row_name {
                Some(expr) => {
                    let value = self.evaluate_grouped(expr, group)?;
                    RowPath::coerce_from_value(&value)
                        .ok_or_else(|| QueryError::InvalidRowName(value.to_string()))?
                }
                None => RowPath::atom(Value::Array(group.key_values.clone()).to_string()),
            };

            let order_keys = self
                .order_by
                .clauses
                .iter()
                .map(|(e, _)| self.evaluate_grouped(e, group))
                .collect::<QueryResult<Vec<_>>>()?;

            rows.push((NamedRow::new(path, columns), order_keys));
        }

        if !self.order_by.is_empty() {
            let orders: Vec<SortOrder> =
                self.order_by.clauses.iter().map(|(_, o)| *o).collect();
            rows.sort_by(|(_, keys_a), (_, keys_b)| {
                for (i, order) in orders.iter().enumerate() {
                    let cmp = compare_values(&keys_a[i], &keys_b[i]);
                    if cmp != std::cmp::Ordering::Equal {
                        return match order {
                            SortOrder::Ascending => cmp,
                            SortOrder::Descending => cmp.reverse(),
                        };
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        let end = limit
            .map(|l| offset.saturating_add(l).min(rows.len()))
            .unwrap_or(rows.len());
        for (row, _) in rows
            .drain(..)
            .skip(offset.min(end))
            .take(end.saturating_sub(offset))
        {
            if !processor(row) {
                return Ok((false, self.schema.clone()));
            }
        }
        Ok((true, self.schema.clone()))
    }

    /// Single pass over the dataset building groups in first-seen order.
    /// Returns None when the progress callback stops the scan.
    fn scan_groups(&self, on_progress: Option<&OnProgressFn<'_>>) -> QueryResult<Option<Vec<Group>>> {
        let paths = self.dataset.row_paths();
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for (done, path) in paths.iter().enumerate() {
            if done > 0 && done % PROGRESS_EVERY == 0 {
                if let Some(cb) = on_progress {
                    if !cb(&progress_record(done, paths.len())) {
                        return Ok(None);
                    }
                }
            }

            let mut cells = self.dataset.row_cells(path);
            {
                let scope = RowScope::new(path, &cells);
                if !to_bool(&(self.where_)(&scope)?) {
                    continue;
                }
            }
            self.when.filter_in_place(path, &mut cells)?;

            let scope = RowScope::new(path, &cells);
            let key_values: Vec<Value> = self
                .key_exprs
                .iter()
                .map(|e| e(&scope))
                .collect::<QueryResult<_>>()?;
            let key = Value::Array(key_values.clone()).to_string();

            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(Group {
                    key_values,
                    members: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].members.push((path.clone(), cells));
        }
        Ok(Some(groups))
    }

    /// Evaluate an expression in group context: grouping keys by structural
    /// match, aggregates over the member rows, everything else recursively.
    fn evaluate_grouped(&self, expr: &Expression, group: &Group) -> QueryResult<Value> {
        if let Some(i) = self.group_by.iter().position(|g| g == expr) {
            return Ok(group.key_values[i].clone());
        }
        match expr {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Timestamp => Ok(Value::Null),
            Expression::Column(column) => {
                Err(QueryError::NonGroupedColumn(column.to_string()))
            }
            Expression::BinaryOp { left, op, right } => evaluate_binary_op(
                &self.evaluate_grouped(left, group)?,
                op,
                &self.evaluate_grouped(right, group)?,
            ),
            Expression::UnaryOp { op, operand } => {
                evaluate_unary_op(op, &self.evaluate_grouped(operand, group)?)
            }
            Expression::Function { name, args } if is_aggregate_function(name) => {
                self.compute_aggregate(name, args, group)
            }
            Expression::Function { name, args } => {
                let values: Vec<Value> = args
                    .iter()
                    .map(|a| self.evaluate_grouped(a, group))
                    .collect::<QueryResult<_>>()?;
                call_builtin(name, &values)
            }
        }
    }

    fn compute_aggregate(
        &self,
        name: &str,
        args: &[Expression],
        group: &Group,
    ) -> QueryResult<Value> {
        let upper = name.to_uppercase();

        if upper == "COUNT" && args.is_empty() {
            return Ok(Value::Number((group.members.len() as i64).into()));
        }

        let values = match args.first() {
            Some(arg) => {
                let bound = bind_expression(arg, &self.scope)?;
                let mut values = Vec::with_capacity(group.members.len());
                for (path, cells) in &group.members {
                    values.push(bound(&RowScope::new(path, cells))?);
                }
                values
            }
            None => group.members.iter().map(|_| Value::Null).collect(),
        };

        match upper.as_str() {
            "COUNT" => Ok(Value::Number(
                (values.iter().filter(|v| !v.is_null()).count() as i64).into(),
            )),
            "SUM" => {
                let sum: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
                Ok(Value::Number(number_from_f64(sum)))
            }
            "AVG" => {
                let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
                if numbers.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::Number(number_from_f64(
                        numbers.iter().sum::<f64>() / numbers.len() as f64,
                    )))
                }
            }
            "MIN" => Ok(values
                .iter()
                .filter(|v| !v.is_null())
                .min_by(|a, b| compare_values(a, b))
                .cloned()
                .unwrap_or(Value::Null)),
            "MAX" => Ok(values
                .iter()
                .filter(|v| !v.is_null())
                .max_by(|a, b| compare_values(a, b))
                .cloned()
                .unwrap_or(Value::Null)),
            _ => Err(QueryError::UnknownFunction(name.to_string())),
        }
    }
}

/// Bind-time validation of an expression in group context.
fn check_grouped(
    expr: &Expression,
    group_by: &[Expression],
    scope: &BindingScope,
) -> QueryResult<()> {
    if group_by.iter().any(|g| g == expr) {
        return Ok(());
    }
    match expr {
        Expression::Literal(_) | Expression::Timestamp => Ok(()),
        Expression::Column(column) => Err(QueryError::NonGroupedColumn(column.to_string())),
        Expression::BinaryOp { left, right, .. } => {
            check_grouped(left, group_by, scope)?;
            check_grouped(right, group_by, scope)
        }
        Expression::UnaryOp { operand, .. } => check_grouped(operand, group_by, scope),
        Expression::Function { name, args } if is_aggregate_function(name) => {
            // Aggregate arguments bind against the row scope.
            for arg in args {
                bind_expression(arg, scope)?;
            }
            Ok(())
        }
        Expression::Function { name, args } => {
            call_builtin(name, &[])?;
            for arg in args {
                check_grouped(arg, group_by, scope)?;
            }
            Ok(())
        }
    }
}
