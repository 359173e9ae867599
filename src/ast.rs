//! Statement and expression AST.
//!
//! Statements arrive already parsed; this crate defines no grammar. The AST
//! here is the read-only input to the executor: a projection, an optional
//! source, a temporal (WHEN) filter, a row predicate (WHERE), grouping,
//! ordering and a result window.

use serde_json::Value;

use crate::path::ColumnPath;

/// A scalar expression, evaluated per row once bound against a scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Column reference (e.g. `x.amount` under alias `x`).
    Column(ColumnPath),

    /// Literal value.
    Literal(Value),

    /// Timestamp of the cell under consideration; only meaningful inside a
    /// WHEN expression, where the filter runs per cell version.
    Timestamp,

    /// Binary operation.
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },

    /// Unary operation.
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },

    /// Function call. Aggregate functions (COUNT, SUM, AVG, MIN, MAX) are
    /// only valid in a GROUP BY query.
    Function { name: String, args: Vec<Expression> },
}

impl Expression {
    pub fn column(path: &str) -> Self {
        Expression::Column(ColumnPath::parse(path))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn function(name: &str, args: Vec<Expression>) -> Self {
        Expression::Function {
            name: name.to_string(),
            args,
        }
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn is_constant_true(&self) -> bool {
        matches!(self, Expression::Literal(Value::Bool(true)))
    }

    /// Printable form of the expression, for error messages.
    pub fn surface(&self) -> String {
        match self {
            Expression::Column(path) => path.to_string(),
            Expression::Literal(value) => value.to_string(),
            Expression::Timestamp => "timestamp()".to_string(),
            Expression::BinaryOp { left, op, right } => {
                format!("({} {} {})", left.surface(), op.symbol(), right.surface())
            }
            Expression::UnaryOp { op, operand } => {
                format!("{}{}", op.symbol(), operand.surface())
            }
            Expression::Function { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.surface()).collect();
                format!("{}({})", name, args.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
}

impl BinaryOperator {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Equal => "=",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessThanOrEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterThanOrEqual => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulus => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

impl UnaryOperator {
    fn symbol(&self) -> &'static str {
        match self {
            UnaryOperator::Not => "NOT ",
            UnaryOperator::Negate => "-",
        }
    }
}

/// True for function names the executor treats as group aggregates.
pub fn is_aggregate_function(name: &str) -> bool {
    matches!(
        name.to_uppercase().as_str(),
        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX"
    )
}

/// True when the expression contains an aggregate call anywhere.
pub fn contains_aggregate(expr: &Expression) -> bool {
    match expr {
        Expression::Column(_) | Expression::Literal(_) | Expression::Timestamp => false,
        Expression::BinaryOp { left, right, .. } => {
            contains_aggregate(left) || contains_aggregate(right)
        }
        Expression::UnaryOp { operand, .. } => contains_aggregate(operand),
        Expression::Function { name, args } => {
            is_aggregate_function(name) || args.iter().any(contains_aggregate)
        }
    }
}

/// One clause of a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectClause {
    /// `*`, selecting every known column of the source.
    Wildcard,
    /// A computed output column.
    Expr {
        expr: Expression,
        alias: ColumnPath,
    },
}

/// The SELECT clause: an ordered list of projection clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpression {
    pub clauses: Vec<SelectClause>,
}

impl SelectExpression {
    /// `SELECT *`
    pub fn wildcard() -> Self {
        SelectExpression {
            clauses: vec![SelectClause::Wildcard],
        }
    }

    pub fn columns(clauses: Vec<(Expression, &str)>) -> Self {
        SelectExpression {
            clauses: clauses
                .into_iter()
                .map(|(expr, alias)| SelectClause::Expr {
                    expr,
                    alias: ColumnPath::parse(alias),
                })
                .collect(),
        }
    }

    pub fn has_wildcard(&self) -> bool {
        self.clauses
            .iter()
            .any(|c| matches!(c, SelectClause::Wildcard))
    }

    /// True when any projection clause contains an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        self.clauses.iter().any(|c| match c {
            SelectClause::Wildcard => false,
            SelectClause::Expr { expr, .. } => contains_aggregate(expr),
        })
    }

    pub fn surface(&self) -> String {
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| match c {
                SelectClause::Wildcard => "*".to_string(),
                SelectClause::Expr { expr, alias } => {
                    format!("{} AS {}", expr.surface(), alias)
                }
            })
            .collect();
        parts.join(", ")
    }
}

/// The WHEN clause: a temporal filter over individual cell versions.
/// `None` means constant true (keep every cell).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WhenExpression {
    pub expr: Option<Expression>,
}

impl WhenExpression {
    pub fn always() -> Self {
        WhenExpression { expr: None }
    }

    pub fn from_expr(expr: Expression) -> Self {
        WhenExpression { expr: Some(expr) }
    }

    pub fn is_constant_true(&self) -> bool {
        match &self.expr {
            None => true,
            Some(e) => e.is_constant_true(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// The ORDER BY clause.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderByExpression {
    pub clauses: Vec<(Expression, SortOrder)>,
}

impl OrderByExpression {
    pub fn nothing() -> Self {
        OrderByExpression {
            clauses: Vec::new(),
        }
    }

    pub fn by(clauses: Vec<(Expression, SortOrder)>) -> Self {
        OrderByExpression { clauses }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// The FROM clause, before binding against a scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TableExpression {
    /// No source at all.
    #[default]
    None,
    /// A named dataset, optionally aliased.
    Dataset { name: String, alias: Option<String> },
    /// A derived table (sub-select); executed through the operator pipeline.
    SubSelect(Box<SelectStatement>),
}

impl TableExpression {
    pub fn dataset(name: &str) -> Self {
        TableExpression::Dataset {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn dataset_as(name: &str, alias: &str) -> Self {
        TableExpression::Dataset {
            name: name.to_string(),
            alias: Some(alias.to_string()),
        }
    }

    pub fn sub_select(statement: SelectStatement) -> Self {
        TableExpression::SubSelect(Box::new(statement))
    }
}

/// A complete, already-parsed query. Read-only input to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub select: SelectExpression,
    pub from: TableExpression,
    pub when: WhenExpression,
    pub where_: Expression,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub order_by: OrderByExpression,
    pub offset: usize,
    /// `None` means no limit.
    pub limit: Option<usize>,
    /// Expression naming each output row. `None` falls back to a default
    /// per execution path (dataset row identity, or "result" with no source).
    pub row_name: Option<Expression>,
}

impl Default for SelectStatement {
    fn default() -> Self {
        SelectStatement {
            select: SelectExpression::wildcard(),
            from: TableExpression::None,
            when: WhenExpression::always(),
            where_: Expression::Literal(Value::Bool(true)),
            group_by: Vec::new(),
            having: None,
            order_by: OrderByExpression::nothing(),
            offset: 0,
            limit: None,
            row_name: None,
        }
    }
}

impl SelectStatement {
    pub fn from_dataset(name: &str) -> Self {
        SelectStatement {
            from: TableExpression::dataset(name),
            ..Default::default()
        }
    }
}
