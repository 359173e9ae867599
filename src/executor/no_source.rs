//! Execution of statements with no FROM clause.
//!
//! Such a statement produces at most one row, so the whole path is a
//! constant-time evaluation against an empty row context. Statement shapes
//! that need a source schema (wildcard, GROUP BY, a non-trivial HAVING) are
//! rejected up front, and an offset skips the only possible row without
//! evaluating anything.

use serde_json::Value;

use crate::ast::{SelectStatement, TableExpression};
use crate::binding::{bind_expression, bind_select, bind_when, BindingScope, RowScope};
use crate::error::{QueryError, QueryResult};
use crate::path::RowPath;
use crate::value::to_bool;

use super::types::NamedRow;

/// Default identity of the single no-source output row.
const DEFAULT_ROW_NAME: &str = "result";

/// Statement-shape validation. All failures here are user errors raised
/// before any evaluation.
pub fn validate_statement_without_dataset(statement: &SelectStatement) -> QueryResult<()> {
    debug_assert!(matches!(statement.from, TableExpression::None));
    if statement.select.has_wildcard() {
        return Err(QueryError::WildcardWithoutFrom);
    }
    if !statement.group_by.is_empty() {
        return Err(QueryError::GroupByWithoutFrom);
    }
    // A literal-true HAVING filters nothing and is allowed to pass.
    if statement
        .having
        .as_ref()
        .is_some_and(|h| !h.is_constant_true())
    {
        return Err(QueryError::HavingWithoutFrom);
    }
    Ok(())
}

/// Validate an evaluated row-name value: it must coerce to a non-empty
/// structured path.
pub fn get_validated_row_name(value: &Value) -> QueryResult<RowPath> {
    let path = RowPath::coerce_from_value(value)
        .ok_or_else(|| QueryError::InvalidRowName(value.to_string()))?;
    if path.is_empty() || path.segments().iter().all(|s| s.is_empty()) {
        return Err(QueryError::EmptyRowName);
    }
    Ok(path)
}

/// Execute a statement with no source. Returns the single output row, or
/// None when the window or the predicate excludes it.
pub fn query_without_dataset(statement: &SelectStatement) -> QueryResult<Option<NamedRow>> {
    validate_statement_without_dataset(statement)?;

    // Bind every clause against the empty scope first, so a column
    // reference anywhere in the statement fails even when the window
    // excludes the row. Binding evaluates nothing.
    let scope = BindingScope::empty();
    let bound_select = bind_select(&statement.select, &scope)?;
    let bound_where = bind_expression(&statement.where_, &scope)?;
    bind_when(&statement.when, &scope)?;
    for (expr, _) in &statement.order_by.clauses {
        bind_expression(expr, &scope)?;
    }
    let bound_row_name = statement
        .row_name
        .as_ref()
        .map(|e| bind_expression(e, &scope))
        .transpose()?;

    // At most one row exists; any offset skips it, and a zero limit asks
    // for nothing. Decided before any expression runs.
    if statement.offset >= 1 || statement.limit == Some(0) {
        return Ok(None);
    }

    let path = RowPath::new(Vec::new());
    let cells = Vec::new();
    let row = RowScope::new(&path, &cells);

    if !to_bool(&bound_where(&row)?) {
        return Ok(None);
    }

    let columns = bound_select.evaluate(&row)?;
    let name = match bound_row_name {
        Some(expr) => get_validated_row_name(&expr(&row)?)?,
        None => RowPath::atom(DEFAULT_ROW_NAME),
    };

    Ok(Some(NamedRow::new(name, columns)))
}
