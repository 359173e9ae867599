//! Expression binding.
//!
//! Binding resolves column references against a scope (a dataset's known
//! schema, or no dataset at all) and produces closures callable per row.
//! Binding never reads row data; evaluation never reads anything but the one
//! row it is given. All statement-shape errors are raised here, before any
//! row is touched.

use chrono::SecondsFormat;
use serde_json::Value;

use crate::ast::{
    is_aggregate_function, Expression, SelectClause, SelectExpression, WhenExpression,
};
use crate::dataset::{Cell, Dataset};
use crate::error::{QueryError, QueryResult};
use crate::path::{schema_surface, ColumnPath, KnownColumn, RowPath, ValueKind};
use crate::value::{evaluate_binary_op, evaluate_unary_op, value_to_f64};

/// What an expression may reference: the known columns of a source (or
/// nothing), plus the alias under which the source was brought into scope.
#[derive(Debug, Clone)]
pub struct BindingScope {
    pub columns: Vec<KnownColumn>,
    pub alias: Option<String>,
    pub source: Option<String>,
}

impl BindingScope {
    pub fn for_dataset(dataset: &dyn Dataset, alias: Option<&str>) -> Self {
        BindingScope {
            columns: dataset.known_columns(),
            alias: alias.map(|a| a.to_string()),
            source: Some(dataset.name().to_string()),
        }
    }

    /// Scope with no source: only literals and scalar functions bind.
    pub fn empty() -> Self {
        BindingScope {
            columns: Vec::new(),
            alias: None,
            source: None,
        }
    }

    /// Resolve a referenced column against the known schema, stripping the
    /// source alias if present.
    fn resolve_column(&self, column: &ColumnPath) -> QueryResult<ColumnPath> {
        let stripped = match &self.alias {
            Some(alias) => column.without_alias(alias),
            None => None,
        };
        for candidate in [stripped.as_ref(), Some(column)].into_iter().flatten() {
            if self.columns.iter().any(|k| &k.column == candidate) {
                return Ok(candidate.clone());
            }
        }
        Err(QueryError::UnknownColumn {
            column: column.to_string(),
            row_schema: schema_surface(&self.columns),
        })
    }

    fn column_kind(&self, column: &ColumnPath) -> ValueKind {
        self.columns
            .iter()
            .find(|k| &k.column == column)
            .map(|k| k.kind)
            .unwrap_or(ValueKind::Atom)
    }
}

/// One row during evaluation. `ts` is set only while the WHEN filter runs,
/// where evaluation happens once per cell version.
pub struct RowScope<'a> {
    pub path: &'a RowPath,
    pub cells: &'a [Cell],
    pub ts: Option<chrono::DateTime<chrono::Utc>>,
}

impl<'a> RowScope<'a> {
    pub fn new(path: &'a RowPath, cells: &'a [Cell]) -> Self {
        RowScope {
            path,
            cells,
            ts: None,
        }
    }

    /// Latest-timestamp value of a column, or null if the row has none.
    pub fn latest(&self, column: &ColumnPath) -> Value {
        let mut best: Option<&Cell> = None;
        for cell in self.cells {
            if &cell.column == column && best.map(|b| cell.ts >= b.ts).unwrap_or(true) {
                best = Some(cell);
            }
        }
        best.map(|c| c.value.clone()).unwrap_or(Value::Null)
    }
}

/// A bound expression: evaluate against one row, get one value.
pub type BoundExpression = Box<dyn Fn(&RowScope) -> QueryResult<Value> + Send + Sync>;

pub fn bind_expression(expr: &Expression, scope: &BindingScope) -> QueryResult<BoundExpression> {
    match expr {
        Expression::Column(column) => {
            let resolved = scope.resolve_column(column)?;
            Ok(Box::new(move |row| Ok(row.latest(&resolved))))
        }
        Expression::Literal(value) => {
            let value = value.clone();
            Ok(Box::new(move |_| Ok(value.clone())))
        }
        Expression::Timestamp => Ok(Box::new(|row| {
            Ok(match row.ts {
                Some(ts) => Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => Value::Null,
            })
        })),
        Expression::BinaryOp { left, op, right } => {
            let left = bind_expression(left, scope)?;
            let right = bind_expression(right, scope)?;
            let op = op.clone();
            Ok(Box::new(move |row| {
                evaluate_binary_op(&left(row)?, &op, &right(row)?)
            }))
        }
        Expression::UnaryOp { op, operand } => {
            let operand = bind_expression(operand, scope)?;
            let op = op.clone();
            Ok(Box::new(move |row| evaluate_unary_op(&op, &operand(row)?)))
        }
        Expression::Function { name, args } => {
            if is_aggregate_function(name) {
                return Err(QueryError::AggregateOutsideGroupBy(name.clone()));
            }
            // Reject unknown names at bind time.
            call_builtin(name, &[])?;
            let bound_args: Vec<BoundExpression> = args
                .iter()
                .map(|a| bind_expression(a, scope))
                .collect::<QueryResult<_>>()?;
            let name = name.clone();
            Ok(Box::new(move |row| {
                let values: Vec<Value> = bound_args
                    .iter()
                    .map(|a| a(row))
                    .collect::<QueryResult<_>>()?;
                call_builtin(&name, &values)
            }))
        }
    }
}

/// Scalar builtin functions. With an empty argument list this only checks
/// that the name exists (used at bind time).
pub(crate) fn call_builtin(name: &str, args: &[Value]) -> QueryResult<Value> {
    match name.to_uppercase().as_str() {
        "ABS" => Ok(args
            .first()
            .and_then(|v| v.as_f64())
            .map(|n| Value::Number(crate::value::number_from_f64(n.abs())))
            .unwrap_or(Value::Null)),
        "UPPER" => Ok(args
            .first()
            .and_then(|v| v.as_str())
            .map(|s| Value::String(s.to_uppercase()))
            .unwrap_or(Value::Null)),
        "LOWER" => Ok(args
            .first()
            .and_then(|v| v.as_str())
            .map(|s| Value::String(s.to_lowercase()))
            .unwrap_or(Value::Null)),
        "LENGTH" => Ok(match args.first() {
            Some(Value::String(s)) => Value::Number((s.chars().count() as i64).into()),
            Some(Value::Array(a)) => Value::Number((a.len() as i64).into()),
            _ => Value::Null,
        }),
        "CONCAT" => {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::String(s) => out.push_str(s),
                    Value::Null => {}
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::String(out))
        }
        "COALESCE" => Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        _ => Err(QueryError::UnknownFunction(name.to_string())),
    }
}

/// A bound projection: the fixed output schema plus a per-row evaluator
/// producing ordered (column, value) pairs.
pub struct BoundSelect {
    pub schema: Vec<KnownColumn>,
    eval: Box<dyn Fn(&RowScope) -> QueryResult<Vec<(ColumnPath, Value)>> + Send + Sync>,
}

impl BoundSelect {
    pub fn evaluate(&self, row: &RowScope) -> QueryResult<Vec<(ColumnPath, Value)>> {
        (self.eval)(row)
    }
}

pub fn bind_select(select: &SelectExpression, scope: &BindingScope) -> QueryResult<BoundSelect> {
    enum BoundClause {
        Wildcard,
        Expr(ColumnPath, BoundExpression),
    }

    let mut schema = Vec::new();
    let mut bound = Vec::new();

    for clause in &select.clauses {
        match clause {
            SelectClause::Wildcard => {
                schema.extend(scope.columns.iter().cloned());
                bound.push(BoundClause::Wildcard);
            }
            SelectClause::Expr { expr, alias } => {
                schema.push(KnownColumn::new(alias.clone(), infer_kind(expr, scope)));
                bound.push(BoundClause::Expr(alias.clone(), bind_expression(expr, scope)?));
            }
        }
    }

    let wildcard_columns: Vec<ColumnPath> =
        scope.columns.iter().map(|k| k.column.clone()).collect();

    let eval = Box::new(move |row: &RowScope| {
        let mut out = Vec::new();
        for clause in &bound {
            match clause {
                BoundClause::Wildcard => {
                    // Latest value per known column, in schema order, for
                    // columns the row actually has after the WHEN filter.
                    for column in &wildcard_columns {
                        if row.cells.iter().any(|c| &c.column == column) {
                            out.push((column.clone(), row.latest(column)));
                        }
                    }
                }
                BoundClause::Expr(alias, expr) => {
                    out.push((alias.clone(), expr(row)?));
                }
            }
        }
        Ok(out)
    });

    Ok(BoundSelect { schema, eval })
}

/// Infer the value kind of a projection clause without reading rows.
pub(crate) fn infer_kind(expr: &Expression, scope: &BindingScope) -> ValueKind {
    use crate::ast::{BinaryOperator, UnaryOperator};
    match expr {
        Expression::Column(column) => {
            let resolved = scope.resolve_column(column).unwrap_or_else(|_| column.clone());
            scope.column_kind(&resolved)
        }
        Expression::Literal(Value::Number(_)) => ValueKind::Numeric,
        Expression::Literal(Value::Object(_)) => ValueKind::Row,
        Expression::Literal(_) => ValueKind::Atom,
        Expression::Timestamp => ValueKind::Atom,
        Expression::BinaryOp { op, .. } => match op {
            BinaryOperator::Add
            | BinaryOperator::Subtract
            | BinaryOperator::Multiply
            | BinaryOperator::Divide
            | BinaryOperator::Modulus => ValueKind::Numeric,
            _ => ValueKind::Atom,
        },
        Expression::UnaryOp { op, .. } => match op {
            UnaryOperator::Negate => ValueKind::Numeric,
            UnaryOperator::Not => ValueKind::Atom,
        },
        Expression::Function { name, .. } => match name.to_uppercase().as_str() {
            "ABS" | "LENGTH" => ValueKind::Numeric,
            _ if is_aggregate_function(name) => ValueKind::Numeric,
            _ => ValueKind::Atom,
        },
    }
}

/// A bound WHEN clause: drops cell versions whose timestamp fails the
/// temporal filter. Constant-true WHEN keeps everything and never evaluates.
pub struct BoundWhen {
    expr: Option<BoundExpression>,
}

impl BoundWhen {
    pub fn filter_in_place(&self, path: &RowPath, cells: &mut Vec<Cell>) -> QueryResult<()> {
        let Some(expr) = &self.expr else {
            return Ok(());
        };
        let snapshot = cells.clone();
        let mut keep = Vec::with_capacity(snapshot.len());
        for cell in &snapshot {
            let scope = RowScope {
                path,
                cells: &snapshot,
                ts: Some(cell.ts),
            };
            keep.push(crate::value::to_bool(&expr(&scope)?));
        }
        let mut index = 0;
        cells.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
        Ok(())
    }
}

pub fn bind_when(when: &WhenExpression, scope: &BindingScope) -> QueryResult<BoundWhen> {
    if when.is_constant_true() {
        return Ok(BoundWhen { expr: None });
    }
    let expr = when
        .expr
        .as_ref()
        .map(|e| bind_expression(e, scope))
        .transpose()?;
    Ok(BoundWhen { expr })
}

/// Build the dense extraction function for a fixed column order: evaluated
/// projection output in, `Vec<f64>` positioned by schema order out.
pub fn extract_double_embedding(
    schema: &[KnownColumn],
) -> impl Fn(&[(ColumnPath, Value)]) -> Vec<f64> + Send + Sync {
    let columns: Vec<ColumnPath> = schema.iter().map(|k| k.column.clone()).collect();
    move |evaluated| {
        columns
            .iter()
            .map(|column| {
                evaluated
                    .iter()
                    .find(|(c, _)| c == column)
                    .map(|(_, v)| value_to_f64(v))
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }
}
