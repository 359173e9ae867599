use thiserror::Error;

/// Errors raised while binding or executing a statement.
///
/// Query errors describe malformed or unsupported statements and are always
/// reported back to the caller; they are raised at bind time, before any row
/// is read. `Internal` marks a broken programming contract and is never the
/// caller's fault.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Unknown column '{column}' in row schema [{row_schema}]")]
    UnknownColumn { column: String, row_schema: String },

    #[error("Select expression '{select}' matched no columns in row schema [{row_schema}]")]
    NoColumnsMatched { select: String, row_schema: String },

    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("Wildcard usage requires a FROM statement")]
    WildcardWithoutFrom,

    #[error("GROUP BY usage requires a FROM statement")]
    GroupByWithoutFrom,

    #[error("HAVING usage requires a FROM statement")]
    HavingWithoutFrom,

    #[error("Wildcard cannot be used in the projection of a GROUP BY query")]
    WildcardWithGroupBy,

    #[error("Aggregate function '{0}' is only valid in a GROUP BY query")]
    AggregateOutsideGroupBy(String),

    #[error("Column '{0}' must appear in the GROUP BY clause or inside an aggregate function")]
    NonGroupedColumn(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error(
        "Unable to create a row name from the passed expression. Row names must be \
         either a simple atom, or a path, or an array of atoms; got {0}"
    )]
    InvalidRowName(String),

    #[error("Can't create a row with a null name")]
    EmptyRowName,

    #[error(
        "This query cannot run from a sub-select or table expression; \
         it must be FROM <dataset name>"
    )]
    DatasetRequired,

    #[error("Statement not supported by the pipeline executor: {0}")]
    UnsupportedPipelineStatement(String),

    #[error("Query execution error: {0}")]
    ExecutionError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type QueryResult<T> = Result<T, QueryError>;

impl QueryError {
    /// True for errors caused by the statement itself, as opposed to a broken
    /// internal contract.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, QueryError::Internal(_))
    }
}

impl serde::Serialize for QueryError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
