//! Operator pipeline for derived tables.
//!
//! Statements reading from a sub-select run through a small pull-based
//! pipeline: source, filter, project, group, order. Each stage pulls tuples
//! from the one below it; the consumer drives the whole chain through
//! `PipelineExecutor::take`, which makes early stop free (stop pulling and
//! nothing more is computed).
//!
//! Column references here resolve against the tuple's materialized columns
//! at evaluation time; a name the tuple does not carry evaluates to null.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::Value;

use crate::ast::{
    contains_aggregate, Expression, OrderByExpression, SelectClause, SelectExpression,
    SelectStatement, SortOrder, WhenExpression,
};
use crate::binding::call_builtin;
use crate::dataset::InMemoryDataset;
use crate::error::{QueryError, QueryResult};
use crate::path::RowPath;
use crate::value::{compare_values, evaluate_binary_op, evaluate_unary_op, to_bool};

use super::grouped::BoundGroupByQuery;
use super::types::NamedRow;
use super::QueryScope;

/// One tuple flowing through the pipeline: the row's identity plus its
/// columns as a flat object.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTuple {
    pub path: RowPath,
    pub values: Value,
}

trait PipelineStage: Send {
    fn next(&mut self) -> QueryResult<Option<PipelineTuple>>;
}

/// A compiled pipeline. `take` pulls the next output tuple; `None` means
/// the pipeline is exhausted. Consuming requires exclusive access, so a
/// pipeline has exactly one consumer.
pub struct PipelineExecutor {
    stage: Box<dyn PipelineStage>,
}

impl PipelineExecutor {
    pub fn take(&mut self) -> QueryResult<Option<PipelineTuple>> {
        self.stage.next()
    }
}

/// Compile a statement over a derived table into a pipeline.
///
/// The pipeline handles projection, filtering, grouping and ordering.
/// Temporal filtering is not expressible over materialized tuples, so a
/// WHEN clause over a derived table is a statement error. A grouped
/// statement replaces the filter/project/order chain with a single group
/// stage, which carries those clauses itself; aggregate functions outside
/// a grouped statement are rejected.
pub fn compile_pipeline(
    statement: &SelectStatement,
    scope: &QueryScope,
    inner: &SelectStatement,
) -> QueryResult<PipelineExecutor> {
    if !statement.when.is_constant_true() {
        return Err(QueryError::UnsupportedPipelineStatement("WHEN".to_string()));
    }

    let grouped = !statement.group_by.is_empty()
        || statement.having.is_some()
        || statement.select.contains_aggregate();
    if grouped {
        return Ok(PipelineExecutor {
            stage: Box::new(GroupStage {
                scope: scope.clone(),
                inner: inner.clone(),
                statement: statement.clone(),
                rows: None,
            }),
        });
    }

    let select_exprs = statement.select.clauses.iter().filter_map(|c| match c {
        SelectClause::Expr { expr, .. } => Some(expr),
        SelectClause::Wildcard => None,
    });
    let order_exprs = statement.order_by.clauses.iter().map(|(e, _)| e);
    for expr in select_exprs.chain(order_exprs).chain([&statement.where_]) {
        if contains_aggregate(expr) {
            return Err(QueryError::UnsupportedPipelineStatement(
                "aggregate function".to_string(),
            ));
        }
    }

    let mut stage: Box<dyn PipelineStage> = Box::new(SourceStage {
        scope: scope.clone(),
        statement: inner.clone(),
        rows: None,
    });
    if !statement.where_.is_constant_true() {
        stage = Box::new(FilterStage {
            input: stage,
            predicate: statement.where_.clone(),
        });
    }
    stage = Box::new(ProjectStage {
        input: stage,
        select: statement.select.clone(),
        row_name: statement.row_name.clone(),
    });
    if !statement.order_by.is_empty() {
        stage = Box::new(OrderStage {
            input: stage,
            order_by: statement.order_by.clone(),
            sorted: None,
        });
    }
    Ok(PipelineExecutor { stage })
}

/// Evaluate an expression against one tuple. Column references read the
/// tuple's object by name; unknown names are null.
fn eval_on_tuple(expr: &Expression, tuple: &PipelineTuple) -> QueryResult<Value> {
    match expr {
        Expression::Column(column) => Ok(tuple
            .values
            .get(column.to_string())
            .cloned()
            .unwrap_or(Value::Null)),
        Expression::Literal(value) => Ok(value.clone()),
        Expression::Timestamp => Ok(Value::Null),
        Expression::BinaryOp { left, op, right } => evaluate_binary_op(
            &eval_on_tuple(left, tuple)?,
            op,
            &eval_on_tuple(right, tuple)?,
        ),
        Expression::UnaryOp { op, operand } => {
            evaluate_unary_op(op, &eval_on_tuple(operand, tuple)?)
        }
        Expression::Function { name, args } => {
            let values: Vec<Value> = args
                .iter()
                .map(|a| eval_on_tuple(a, tuple))
                .collect::<QueryResult<_>>()?;
            call_builtin(name, &values)
        }
    }
}

/// Runs the inner statement on first pull and feeds its output upward.
struct SourceStage {
    scope: QueryScope,
    statement: SelectStatement,
    rows: Option<VecDeque<PipelineTuple>>,
}

impl PipelineStage for SourceStage {
    fn next(&mut self) -> QueryResult<Option<PipelineTuple>> {
        if self.rows.is_none() {
            tracing::debug!("materializing pipeline source");
            let rows = self.scope.query_from_statement(&self.statement)?;
            self.rows = Some(
                rows.into_iter()
                    .map(|(path, values)| PipelineTuple { path, values })
                    .collect(),
            );
        }
        Ok(self.rows.as_mut().and_then(|rows| rows.pop_front()))
    }
}

/// Materializes the derived table into a staging dataset on first pull and
/// runs the grouping machinery over it, yielding one tuple per surviving
/// group. WHERE, HAVING, row naming and ordering are all handled by the
/// grouped query; the offset/limit window stays with the consumer.
struct GroupStage {
    scope: QueryScope,
    inner: SelectStatement,
    statement: SelectStatement,
    rows: Option<VecDeque<PipelineTuple>>,
}

impl PipelineStage for GroupStage {
    fn next(&mut self) -> QueryResult<Option<PipelineTuple>> {
        if self.rows.is_none() {
            tracing::debug!("materializing pipeline source for grouping");
            let mut staged = InMemoryDataset::new("derived");
            for (path, values) in self.scope.query_from_statement(&self.inner)? {
                let Value::Object(obj) = values else {
                    continue;
                };
                staged.add_row(
                    path,
                    obj.iter().map(|(k, v)| (k.as_str(), v.clone())).collect(),
                );
            }

            let query = BoundGroupByQuery::bind(
                &self.statement.select,
                &staged,
                None,
                &WhenExpression::always(),
                &self.statement.where_,
                &self.statement.group_by,
                self.statement.having.as_ref(),
                &self.statement.order_by,
                self.statement.row_name.as_ref(),
            )?;

            let out: Mutex<VecDeque<PipelineTuple>> = Mutex::new(VecDeque::new());
            let processor = |row: NamedRow| {
                out.lock().push_back(PipelineTuple {
                    path: row.path.clone(),
                    values: row.into_value(),
                });
                true
            };
            query.execute(&processor, 0, None, None)?;
            self.rows = Some(out.into_inner());
        }
        Ok(self.rows.as_mut().and_then(|rows| rows.pop_front()))
    }
}

struct FilterStage {
    input: Box<dyn PipelineStage>,
    predicate: Expression,
}

impl PipelineStage for FilterStage {
    fn next(&mut self) -> QueryResult<Option<PipelineTuple>> {
        while let Some(tuple) = self.input.next()? {
            if to_bool(&eval_on_tuple(&self.predicate, &tuple)?) {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }
}

struct ProjectStage {
    input: Box<dyn PipelineStage>,
    select: SelectExpression,
    row_name: Option<Expression>,
}

impl PipelineStage for ProjectStage {
    fn next(&mut self) -> QueryResult<Option<PipelineTuple>> {
        let Some(tuple) = self.input.next()? else {
            return Ok(None);
        };

        let mut out = serde_json::Map::new();
        for clause in &self.select.clauses {
            match clause {
                SelectClause::Wildcard => {
                    if let Value::Object(obj) = &tuple.values {
                        for (k, v) in obj {
                            out.insert(k.clone(), v.clone());
                        }
                    }
                }
                SelectClause::Expr { expr, alias } => {
                    out.insert(alias.to_string(), eval_on_tuple(expr, &tuple)?);
                }
            }
        }

        let path = match &self.row_name {
            Some(expr) => {
                let value = eval_on_tuple(expr, &tuple)?;
                RowPath::coerce_from_value(&value)
                    .ok_or_else(|| QueryError::InvalidRowName(value.to_string()))?
            }
            None => tuple.path,
        };

        Ok(Some(PipelineTuple {
            path,
            values: Value::Object(out),
        }))
    }
}

/// Buffers everything below it on first pull, then yields in sorted order.
struct OrderStage {
    input: Box<dyn PipelineStage>,
    order_by: OrderByExpression,
    sorted: Option<VecDeque<PipelineTuple>>,
}

impl PipelineStage for OrderStage {
    fn next(&mut self) -> QueryResult<Option<PipelineTuple>> {
        if self.sorted.is_none() {
            let mut keyed = Vec::new();
            while let Some(tuple) = self.input.next()? {
                let keys: Vec<Value> = self
                    .order_by
                    .clauses
                    .iter()
                    .map(|(e, _)| eval_on_tuple(e, &tuple))
                    .collect::<QueryResult<_>>()?;
                keyed.push((tuple, keys));
            }
            let orders: Vec<SortOrder> =
                self.order_by.clauses.iter().map(|(_, o)| *o).collect();
            keyed.sort_by(|(tuple_a, keys_a), (tuple_b, keys_b)| {
                for (i, order) in orders.iter().enumerate() {
                    let cmp = compare_values(&keys_a[i], &keys_b[i]);
                    if cmp != std::cmp::Ordering::Equal {
                        return match order {
                            SortOrder::Ascending => cmp,
                            SortOrder::Descending => cmp.reverse(),
                        };
                    }
                }
                tuple_a.path.cmp(&tuple_b.path)
            });
            self.sorted = Some(keyed.into_iter().map(|(tuple, _)| tuple).collect());
        }
        Ok(self.sorted.as_mut().and_then(|rows| rows.pop_front()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOperator, TableExpression};
    use crate::dataset::InMemoryDataset;
    use serde_json::json;
    use std::sync::Arc;

    fn scope_with_scores() -> QueryScope {
        let mut ds = InMemoryDataset::new("scores");
        ds.add_row("u1", vec![("name", json!("ann")), ("score", json!(10))]);
        ds.add_row("u2", vec![("name", json!("bob")), ("score", json!(30))]);
        ds.add_row("u3", vec![("name", json!("cat")), ("score", json!(20))]);
        let mut scope = QueryScope::new();
        scope.register(Arc::new(ds));
        scope
    }

    fn drain(executor: &mut PipelineExecutor) -> Vec<PipelineTuple> {
        let mut out = Vec::new();
        while let Some(tuple) = executor.take().unwrap() {
            out.push(tuple);
        }
        out
    }

    #[test]
    fn test_filter_and_project_over_sub_select() {
        let scope = scope_with_scores();
        let inner = SelectStatement::from_dataset("scores");
        let statement = SelectStatement {
            select: SelectExpression::columns(vec![(Expression::column("name"), "who")]),
            from: TableExpression::sub_select(inner.clone()),
            where_: Expression::binary(
                Expression::column("score"),
                BinaryOperator::GreaterThan,
                Expression::literal(json!(15)),
            ),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let tuples = drain(&mut executor);
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].values, json!({"who": "bob"}));
        assert_eq!(tuples[1].values, json!({"who": "cat"}));
    }

    #[test]
    fn test_order_stage_sorts_projected_tuples() {
        let scope = scope_with_scores();
        let inner = SelectStatement::from_dataset("scores");
        let statement = SelectStatement {
            select: SelectExpression::wildcard(),
            from: TableExpression::sub_select(inner.clone()),
            order_by: OrderByExpression::by(vec![(
                Expression::column("score"),
                SortOrder::Descending,
            )]),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let tuples = drain(&mut executor);
        let scores: Vec<Value> = tuples
            .iter()
            .map(|t| t.values.get("score").cloned().unwrap())
            .collect();
        assert_eq!(scores, vec![json!(30), json!(20), json!(10)]);
    }

    #[test]
    fn test_early_stop_pulls_nothing_further() {
        let scope = scope_with_scores();
        let inner = SelectStatement::from_dataset("scores");
        let statement = SelectStatement {
            from: TableExpression::sub_select(inner.clone()),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let first = executor.take().unwrap();
        assert!(first.is_some());
        // The consumer simply stops pulling; nothing else to assert beyond
        // the pipeline still being in a usable state.
        let second = executor.take().unwrap();
        assert!(second.is_some());
    }

    #[test]
    fn test_unknown_column_evaluates_to_null() {
        let scope = scope_with_scores();
        let inner = SelectStatement::from_dataset("scores");
        let statement = SelectStatement {
            select: SelectExpression::columns(vec![(Expression::column("missing"), "m")]),
            from: TableExpression::sub_select(inner.clone()),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let tuples = drain(&mut executor);
        assert_eq!(tuples[0].values, json!({"m": null}));
    }

    fn scope_with_sales() -> QueryScope {
        let mut ds = InMemoryDataset::new("sales");
        ds.add_row("s1", vec![("region", json!("east")), ("amount", json!(10))]);
        ds.add_row("s2", vec![("region", json!("west")), ("amount", json!(5))]);
        ds.add_row("s3", vec![("region", json!("east")), ("amount", json!(7))]);
        let mut scope = QueryScope::new();
        scope.register(Arc::new(ds));
        scope
    }

    #[test]
    fn test_group_by_over_derived_table() {
        let scope = scope_with_sales();
        let inner = SelectStatement::from_dataset("sales");
        let statement = SelectStatement {
            select: SelectExpression::columns(vec![
                (Expression::column("region"), "region"),
                (
                    Expression::function("sum", vec![Expression::column("amount")]),
                    "total",
                ),
            ]),
            from: TableExpression::sub_select(inner.clone()),
            group_by: vec![Expression::column("region")],
            order_by: OrderByExpression::by(vec![(
                Expression::column("region"),
                SortOrder::Ascending,
            )]),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let tuples = drain(&mut executor);
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].values, json!({"region": "east", "total": 17.0}));
        assert_eq!(tuples[1].values, json!({"region": "west", "total": 5.0}));
    }

    #[test]
    fn test_having_filters_derived_table_groups() {
        let scope = scope_with_sales();
        let inner = SelectStatement::from_dataset("sales");
        let statement = SelectStatement {
            select: SelectExpression::columns(vec![(Expression::column("region"), "region")]),
            from: TableExpression::sub_select(inner.clone()),
            group_by: vec![Expression::column("region")],
            having: Some(Expression::binary(
                Expression::function("sum", vec![Expression::column("amount")]),
                BinaryOperator::GreaterThan,
                Expression::literal(json!(10)),
            )),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let tuples = drain(&mut executor);
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].values, json!({"region": "east"}));
    }

    #[test]
    fn test_aggregate_without_group_by_collapses_to_one_row() {
        let scope = scope_with_sales();
        let inner = SelectStatement::from_dataset("sales");
        let statement = SelectStatement {
            select: SelectExpression::columns(vec![(
                Expression::function("count", vec![]),
                "n",
            )]),
            from: TableExpression::sub_select(inner.clone()),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let tuples = drain(&mut executor);
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].values, json!({"n": 3}));
    }

    #[test]
    fn test_when_over_derived_table_is_rejected() {
        let scope = scope_with_scores();
        let inner = SelectStatement::from_dataset("scores");
        let statement = SelectStatement {
            from: TableExpression::sub_select(inner.clone()),
            when: crate::ast::WhenExpression::from_expr(Expression::Timestamp),
            ..Default::default()
        };
        assert!(matches!(
            compile_pipeline(&statement, &scope, &inner),
            Err(QueryError::UnsupportedPipelineStatement(_))
        ));
    }

    #[test]
    fn test_row_name_renames_tuples() {
        let scope = scope_with_scores();
        let inner = SelectStatement::from_dataset("scores");
        let statement = SelectStatement {
            select: SelectExpression::columns(vec![(Expression::column("score"), "score")]),
            from: TableExpression::sub_select(inner.clone()),
            row_name: Some(Expression::column("name")),
            ..Default::default()
        };

        let mut executor = compile_pipeline(&statement, &scope, &inner).unwrap();
        let names: Vec<String> = drain(&mut executor)
            .iter()
            .map(|t| t.path.to_string())
            .collect();
        assert_eq!(names, vec!["ann", "bob", "cat"]);
    }
}
