//! Statement Execution Tests
//!
//! End-to-end tests for:
//! - Table scans with WHERE / WHEN / ORDER BY / OFFSET / LIMIT
//! - Offset/limit windowing arithmetic
//! - GROUP BY with aggregates, HAVING and group ordering
//! - Sub-select execution through the operator pipeline
//! - No-source statements
//! - Streaming consumption and early stop

use chrono::{TimeZone, Utc};
use denseql::{
    BinaryOperator, ColumnPath, Expression, InMemoryDataset, OrderByExpression, QueryError,
    QueryScope, SelectExpression, SelectStatement, SortOrder, TableExpression, WhenExpression,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn create_events_scope() -> QueryScope {
    let mut ds = InMemoryDataset::new("events");
    for i in 0..10 {
        ds.add_row(
            format!("e{:02}", i).as_str(),
            vec![
                ("seq", json!(i as i64)),
                ("kind", json!(if i % 2 == 0 { "click" } else { "view" })),
            ],
        );
    }
    let mut scope = QueryScope::new();
    scope.register(Arc::new(ds));
    scope
}

fn run(scope: &QueryScope, statement: &SelectStatement) -> Vec<(String, Value)> {
    scope
        .query_from_statement(statement)
        .expect("query failed")
        .into_iter()
        .map(|(path, value)| (path.to_string(), value))
        .collect()
}

#[test]
fn test_full_table_scan() {
    let scope = create_events_scope();
    let rows = run(&scope, &SelectStatement::from_dataset("events"));
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0].0, "e00");
    assert_eq!(rows[0].1, json!({"seq": 0, "kind": "click"}));
}

#[test]
fn test_where_and_projection() {
    let scope = create_events_scope();
    let statement = SelectStatement {
        select: SelectExpression::columns(vec![(Expression::column("seq"), "seq")]),
        where_: Expression::binary(
            Expression::column("kind"),
            BinaryOperator::Equal,
            Expression::literal(json!("view")),
        ),
        ..SelectStatement::from_dataset("events")
    };
    let rows = run(&scope, &statement);
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|(p, _)| p.starts_with('e')));
    assert_eq!(rows[0].1, json!({"seq": 1}));
}

#[test]
fn test_offset_limit_window_arithmetic() {
    // Returned count must be max(0, min(L, N - O)) for N matching rows.
    let scope = create_events_scope();
    let n: i64 = 10;
    for offset in 0..13usize {
        for limit in 0..12usize {
            let statement = SelectStatement {
                offset,
                limit: Some(limit),
                ..SelectStatement::from_dataset("events")
            };
            let rows = run(&scope, &statement);
            let expected = (n - offset as i64).clamp(0, limit as i64);
            assert_eq!(
                rows.len() as i64,
                expected,
                "offset={} limit={}",
                offset,
                limit
            );
        }
    }
}

#[test]
fn test_order_by_applies_before_window() {
    let scope = create_events_scope();
    let statement = SelectStatement {
        order_by: OrderByExpression::by(vec![(
            Expression::column("seq"),
            SortOrder::Descending,
        )]),
        offset: 2,
        limit: Some(3),
        ..SelectStatement::from_dataset("events")
    };
    let rows = run(&scope, &statement);
    let paths: Vec<&str> = rows.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, vec!["e07", "e06", "e05"]);
}

#[test]
fn test_idempotent_execution() {
    let scope = create_events_scope();
    let statement = SelectStatement {
        where_: Expression::binary(
            Expression::column("seq"),
            BinaryOperator::GreaterThan,
            Expression::literal(json!(3)),
        ),
        ..SelectStatement::from_dataset("events")
    };
    let first = run(&scope, &statement);
    let second = run(&scope, &statement);
    assert_eq!(first, second);
}

#[test]
fn test_when_filter_selects_cell_versions() {
    let mut ds = InMemoryDataset::new("readings");
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    ds.add_cell("sensor", ColumnPath::parse("temp"), json!(18), t1);
    ds.add_cell("sensor", ColumnPath::parse("temp"), json!(25), t2);
    let mut scope = QueryScope::new();
    scope.register(Arc::new(ds));

    // Keep only cells recorded before 2024-03-01; the later reading must
    // not leak through.
    let statement = SelectStatement {
        when: WhenExpression::from_expr(Expression::binary(
            Expression::Timestamp,
            BinaryOperator::LessThan,
            Expression::literal(json!("2024-03-01")),
        )),
        ..SelectStatement::from_dataset("readings")
    };
    let rows = run(&scope, &statement);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, json!({"temp": 18}));
}

#[test]
fn test_group_by_having_and_order() {
    let mut ds = InMemoryDataset::new("sales");
    ds.add_row("s1", vec![("product", json!("widget")), ("amount", json!(100))]);
    ds.add_row("s2", vec![("product", json!("gadget")), ("amount", json!(200))]);
    ds.add_row("s3", vec![("product", json!("widget")), ("amount", json!(150))]);
    ds.add_row("s4", vec![("product", json!("gizmo")), ("amount", json!(75))]);
    ds.add_row("s5", vec![("product", json!("gadget")), ("amount", json!(250))]);
    let mut scope = QueryScope::new();
    scope.register(Arc::new(ds));

    let total = Expression::function("SUM", vec![Expression::column("amount")]);
    let statement = SelectStatement {
        select: SelectExpression::columns(vec![
            (Expression::column("product"), "product"),
            (total.clone(), "total"),
        ]),
        group_by: vec![Expression::column("product")],
        having: Some(Expression::binary(
            total.clone(),
            BinaryOperator::GreaterThanOrEqual,
            Expression::literal(json!(200)),
        )),
        order_by: OrderByExpression::by(vec![(total, SortOrder::Descending)]),
        ..SelectStatement::from_dataset("sales")
    };
    let rows = run(&scope, &statement);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, json!({"product": "gadget", "total": 450.0}));
    assert_eq!(rows[1].1, json!({"product": "widget", "total": 250.0}));
}

#[test]
fn test_sub_select_pipeline() {
    let scope = create_events_scope();
    let inner = SelectStatement {
        where_: Expression::binary(
            Expression::column("seq"),
            BinaryOperator::GreaterThanOrEqual,
            Expression::literal(json!(5)),
        ),
        ..SelectStatement::from_dataset("events")
    };
    let statement = SelectStatement {
        select: SelectExpression::columns(vec![(
            Expression::binary(
                Expression::column("seq"),
                BinaryOperator::Multiply,
                Expression::literal(json!(10)),
            ),
            "scaled",
        )]),
        from: TableExpression::sub_select(inner),
        limit: Some(2),
        ..Default::default()
    };
    let rows = run(&scope, &statement);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, json!({"scaled": 50.0}));
    assert_eq!(rows[1].1, json!({"scaled": 60.0}));
}

#[test]
fn test_pipeline_stops_pulling_at_window_end() {
    // limit on the outer statement means the pipeline is pulled at most
    // offset + limit times; a small window over a filtered sub-select must
    // complete without draining the source.
    let scope = create_events_scope();
    let inner = SelectStatement::from_dataset("events");
    let statement = SelectStatement {
        from: TableExpression::sub_select(inner),
        offset: 1,
        limit: Some(2),
        ..Default::default()
    };
    let rows = run(&scope, &statement);
    let paths: Vec<&str> = rows.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, vec!["e01", "e02"]);
}

#[test]
fn test_group_by_over_sub_select() {
    let scope = create_events_scope();
    let inner = SelectStatement {
        where_: Expression::binary(
            Expression::column("seq"),
            BinaryOperator::LessThan,
            Expression::literal(json!(6)),
        ),
        ..SelectStatement::from_dataset("events")
    };
    let statement = SelectStatement {
        select: SelectExpression::columns(vec![
            (Expression::column("kind"), "kind"),
            (Expression::function("COUNT", vec![]), "n"),
        ]),
        from: TableExpression::sub_select(inner),
        group_by: vec![Expression::column("kind")],
        order_by: OrderByExpression::by(vec![(
            Expression::column("kind"),
            SortOrder::Ascending,
        )]),
        ..Default::default()
    };
    let rows = run(&scope, &statement);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, json!({"kind": "click", "n": 3}));
    assert_eq!(rows[1].1, json!({"kind": "view", "n": 3}));
}

#[test]
fn test_no_source_select() {
    let scope = QueryScope::new();
    let statement = SelectStatement {
        select: SelectExpression::columns(vec![(Expression::literal(json!(1)), "x")]),
        ..Default::default()
    };
    let rows = run(&scope, &statement);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "result");
    assert_eq!(rows[0].1, json!({"x": 1}));

    // Any offset skips the single row.
    let offset = SelectStatement {
        offset: 1,
        ..statement.clone()
    };
    assert!(run(&scope, &offset).is_empty());
}

#[test]
fn test_no_source_rejects_wildcard_and_group_by() {
    let scope = QueryScope::new();

    let wildcard = SelectStatement::default();
    assert!(matches!(
        scope.query_from_statement(&wildcard),
        Err(QueryError::WildcardWithoutFrom)
    ));

    let grouped = SelectStatement {
        select: SelectExpression::columns(vec![(Expression::literal(json!(1)), "x")]),
        group_by: vec![Expression::column("x")],
        ..Default::default()
    };
    assert!(matches!(
        scope.query_from_statement(&grouped),
        Err(QueryError::GroupByWithoutFrom)
    ));
}

#[test]
fn test_no_source_having_needs_a_real_filter() {
    let scope = QueryScope::new();
    let base = SelectStatement {
        select: SelectExpression::columns(vec![(Expression::literal(json!(1)), "x")]),
        ..Default::default()
    };

    // A literal-true HAVING filters nothing, so the single row survives.
    let trivial = SelectStatement {
        having: Some(Expression::literal(json!(true))),
        ..base.clone()
    };
    let rows = run(&scope, &trivial);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1, json!({"x": 1}));

    let filtering = SelectStatement {
        having: Some(Expression::literal(json!(false))),
        ..base
    };
    assert!(matches!(
        scope.query_from_statement(&filtering),
        Err(QueryError::HavingWithoutFrom)
    ));
}

#[test]
fn test_streaming_early_stop_sees_no_further_rows() {
    let scope = create_events_scope();
    let mut seen = Vec::new();
    let completed = scope
        .query_from_statement_streaming(&SelectStatement::from_dataset("events"), |path, _| {
            seen.push(path.to_string());
            seen.len() < 4
        })
        .unwrap();
    assert!(!completed);
    assert_eq!(seen, vec!["e00", "e01", "e02", "e03"]);
}

#[test]
fn test_unknown_column_fails_before_rows() {
    let scope = create_events_scope();
    let statement = SelectStatement {
        where_: Expression::column("no_such"),
        ..SelectStatement::from_dataset("events")
    };
    let err = scope.query_from_statement(&statement).unwrap_err();
    assert!(err.is_user_error());
    assert!(err.to_string().contains("no_such"));
    assert!(err.to_string().contains("seq, kind"));
}
