use crate::value::ValueType;

/// Boxed error returned by executor collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for sqlx-named-query
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A method name was registered twice with different definitions
    #[error("Method '{0}' is already registered with a different query")]
    DuplicateMethod(String),

    /// The query text is empty or whitespace only
    #[error("Query for '{0}' is empty")]
    EmptyQuery(String),

    /// A colon-prefixed token is not a valid bind marker
    #[error("Malformed query at offset {offset}: {reason}")]
    MalformedQuery { offset: usize, reason: String },

    /// A placeholder has no method parameter with the same name
    #[error("Placeholder ':{0}' does not match any method parameter")]
    UnresolvedParameter(String),

    /// A method parameter is never referenced by the query
    #[error("Parameter '{0}' is not used by the query")]
    UnusedParameter(String),

    /// Parameter names that collide exactly or only differ by case
    #[error("Parameter '{name}' is ambiguous with: {}", candidates.join(", "))]
    AmbiguousParameter {
        name: String,
        candidates: Vec<String>,
    },

    /// The statement would exceed the engine's bind parameter ceiling.
    ///
    /// `from_collection` is set when collection arguments of one call pushed it
    /// over; otherwise the statement is too large whatever the arguments.
    #[error("Query needs {required} bind parameters, the limit is {limit}")]
    TooManyBindParameters {
        required: usize,
        limit: usize,
        from_collection: bool,
    },

    /// The leading keyword is not SELECT, INSERT, UPDATE or DELETE
    #[error("Unsupported statement kind '{0}'")]
    UnsupportedStatementKind(String),

    /// The declared return shape cannot be produced by the statement kind
    #[error("A {kind} statement cannot return {shape}")]
    IncompatibleReturnType { kind: String, shape: String },

    /// Table referenced by the query is not part of the schema
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    /// Column referenced by the query is not part of any referenced table
    #[error("Unknown column '{column}' in {}", tables.join(", "))]
    UnknownColumn { column: String, tables: Vec<String> },

    /// No result column matches any field of the record
    #[error("No result column matches a field of '{record}' (columns: {})", columns.join(", "))]
    NoMatchingColumns { record: String, columns: Vec<String> },

    /// Two candidates compete for the same column or field
    #[error("Column '{column}' is ambiguous for '{record}': {reason}")]
    AmbiguousColumn {
        record: String,
        column: String,
        reason: String,
    },

    /// Scalar results need exactly one column
    #[error("Scalar result expects exactly one column, found {0}")]
    ScalarColumnCount(usize),

    /// A result value does not have the declared type
    #[error("Column '{column}' should hold {expected}, found {found}")]
    ColumnTypeMismatch {
        column: String,
        expected: ValueType,
        found: ValueType,
    },

    /// A strict single-value shape got zero rows
    #[error("Query returned no rows for a non-optional result")]
    EmptyResult,

    /// A NULL landed in a non-nullable slot
    #[error("Unexpected NULL for '{0}'")]
    UnexpectedNull(String),

    /// No value supplied for a declared parameter
    #[error("No argument supplied for parameter '{0}'")]
    MissingArgument(String),

    /// Supplied value does not fit the parameter declaration
    #[error("Argument for parameter '{name}' does not fit its declaration: {reason}")]
    ArgumentMismatch { name: String, reason: String },

    /// The executor produced an outcome that does not fit the statement kind
    #[error("Executor returned {found} for a {kind} statement")]
    UnexpectedOutcome { kind: String, found: String },

    /// Error during SQL pattern compilation
    #[error("Failed to parse SQL template: {0}")]
    Parse(#[from] regex::Error),

    /// Error from SQLx database operations
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Error raised by an executor collaborator
    #[error("Executor error: {0}")]
    Executor(#[source] BoxError),
}

impl Error {
    /// Returns true for errors detected while compiling a query definition.
    ///
    /// These are permanent for the method. Everything else is reported per call.
    pub fn is_definition_time(&self) -> bool {
        matches!(
            self,
            Error::DuplicateMethod(_)
                | Error::EmptyQuery(_)
                | Error::MalformedQuery { .. }
                | Error::UnresolvedParameter(_)
                | Error::UnusedParameter(_)
                | Error::AmbiguousParameter { .. }
                | Error::UnsupportedStatementKind(_)
                | Error::IncompatibleReturnType { .. }
                | Error::UnknownTable(_)
                | Error::UnknownColumn { .. }
                | Error::NoMatchingColumns { .. }
                | Error::AmbiguousColumn { .. }
                | Error::ScalarColumnCount(_)
                | Error::TooManyBindParameters {
                    from_collection: false,
                    ..
                }
                | Error::Parse(_)
        )
    }
}

/// Result type alias for sqlx-named-query operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
