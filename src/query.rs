use crate::binder::{self, Arguments, BindArgument, ParameterDecl};
use crate::classifier::{classify, StatementKind};
use crate::config::BinderConfig;
use crate::error::{Error, Result};
use crate::executor::{BoundStatement, ExecutionOutcome, Executor};
use crate::mapper::{ColumnMapping, QueryOutput, ResultMapper};
use crate::reactive::{InvalidationNotifier, ReactiveSubscription};
use crate::scanner::{BindMarker, QueryText};
use crate::schema::{check_return_shape, QueryAnalysis, SchemaSource, SchemaValidator};
use crate::shape::ReturnShape;
use crate::value::ValueType;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Everything known about a query method before it is compiled: its SQL, its
/// parameters and what it returns.
///
/// # Examples
///
/// ```
/// use sqlx_named_query::{QueryDefinition, ReturnShape, ValueType};
///
/// let definition = QueryDefinition::new(
///     "findSongsByReleaseYear",
///     "SELECT * FROM song WHERE release_year = :year",
///     ReturnShape::collection(ReturnShape::Scalar(ValueType::Integer)),
/// )
/// .param("year", ValueType::Integer);
/// assert_eq!(definition.parameters.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDefinition {
    pub method: String,
    pub sql: String,
    pub parameters: Vec<ParameterDecl>,
    pub returns: ReturnShape,
}

impl QueryDefinition {
    pub fn new(method: impl Into<String>, sql: impl Into<String>, returns: ReturnShape) -> Self {
        Self {
            method: method.into(),
            sql: sql.into(),
            parameters: Vec::new(),
            returns,
        }
    }

    /// Declares a single-valued parameter.
    pub fn param(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.parameters.push(ParameterDecl::single(name, ty));
        self
    }

    /// Declares a collection parameter, expanded into one marker per item.
    pub fn collection_param(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.parameters.push(ParameterDecl::collection(name, ty));
        self
    }
}

/// A query method compiled and verified against a schema.
///
/// Compilation scans the SQL, resolves placeholders to parameters, classifies the
/// statement, checks the return shape and the schema, and plans the result
/// mapping. Every failure there is permanent for the method. The compiled query
/// is immutable and can be shared across threads; each call binds its own
/// [`BoundStatement`].
///
/// # Examples
///
/// ```
/// use sqlx_named_query::prelude::*;
///
/// let schema = SchemaSnapshot::new().with_table("song", ["id", "name", "release_year"]);
/// let query = PreparedQuery::compile(
///     QueryDefinition::new(
///         "findByIds",
///         "SELECT * FROM song WHERE id IN(:songIds)",
///         ReturnShape::collection(ReturnShape::Scalar(ValueType::Integer)),
///     )
///     .collection_param("songIds", ValueType::Integer),
///     &schema,
///     &BinderConfig::default(),
/// );
/// // `SELECT *` yields three columns, a scalar needs exactly one
/// assert!(matches!(query, Err(Error::ScalarColumnCount(3))));
/// ```
#[derive(Debug)]
pub struct PreparedQuery {
    definition: QueryDefinition,
    text: QueryText,
    markers: Vec<BindMarker>,
    arguments: Vec<BindArgument>,
    kind: StatementKind,
    analysis: QueryAnalysis,
    mapper: Option<Arc<ResultMapper>>,
    config: BinderConfig,
}

impl PreparedQuery {
    /// Compiles `definition` against `schema`.
    ///
    /// # Errors
    ///
    /// Any definition-time error: malformed or empty SQL, unresolved, unused or
    /// ambiguous parameters, unsupported statements, incompatible return shapes,
    /// unknown tables or columns, unmappable results, or a statement without
    /// collection parameters that already exceeds the bind parameter ceiling.
    pub fn compile(
        definition: QueryDefinition,
        schema: &dyn SchemaSource,
        config: &BinderConfig,
    ) -> Result<Self> {
        let text = QueryText::new(definition.method.clone(), definition.sql.clone())?;
        let markers = text.markers()?;
        let arguments = binder::resolve(
            markers.iter().filter_map(BindMarker::as_named),
            &definition.parameters,
            config.unused_parameters,
        )?;
        let kind = classify(text.as_str())?;
        check_return_shape(kind, &definition.returns)?;
        let analysis = SchemaValidator::new(schema).analyze(&text, kind)?;

        if let Some(required) = binder::fixed_marker_count(&markers, &arguments) {
            if required > config.max_bind_parameters {
                return Err(Error::TooManyBindParameters {
                    required,
                    limit: config.max_bind_parameters,
                    from_collection: false,
                });
            }
        }

        let mapper = if kind.is_read() {
            let columns = analysis.result_columns.as_deref();
            Some(Arc::new(ResultMapper::new(&definition.returns, columns)?))
        } else {
            None
        };

        debug!(
            method = %definition.method,
            kind = %kind,
            markers = markers.len(),
            "compiled query"
        );
        Ok(Self {
            definition,
            text,
            markers,
            arguments,
            kind,
            analysis,
            mapper,
            config: config.clone(),
        })
    }

    pub fn method(&self) -> &str {
        self.text.method()
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn returns(&self) -> &ReturnShape {
        &self.definition.returns
    }

    pub fn arguments(&self) -> &[BindArgument] {
        &self.arguments
    }

    /// Schema tables the statement references.
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.analysis.tables
    }

    /// Result columns inferred at compile time, if knowable.
    pub fn result_columns(&self) -> Option<&[String]> {
        self.analysis.result_columns.as_deref()
    }

    /// The record mapping planned at compile time, if the columns were known.
    pub fn column_mapping(&self) -> Option<&ColumnMapping> {
        self.mapper.as_deref().and_then(ResultMapper::planned)
    }

    /// Binds one call's arguments.
    ///
    /// # Errors
    ///
    /// `MissingArgument` and `ArgumentMismatch` for arguments that do not fit the
    /// declaration, `TooManyBindParameters` when collections push the marker
    /// count over the ceiling.
    pub fn bind(&self, args: &Arguments) -> Result<BoundStatement> {
        let binding = binder::bind(
            self.text.as_str(),
            &self.markers,
            &self.arguments,
            args,
            &self.config,
        )?;
        Ok(BoundStatement {
            sql: binding.sql,
            values: binding.values,
            kind: self.kind,
            mapper: self.mapper.clone(),
        })
    }

    /// Binds, runs and maps a call.
    ///
    /// For observable shapes this evaluates the current value once.
    pub fn execute<E>(&self, executor: &E, args: &Arguments) -> Result<QueryOutput>
    where
        E: Executor + ?Sized,
    {
        let statement = self.bind(args)?;
        self.run(executor, &statement)
    }

    /// Runs an already bound statement and maps its outcome.
    pub fn run<E>(&self, executor: &E, statement: &BoundStatement) -> Result<QueryOutput>
    where
        E: Executor + ?Sized,
    {
        let outcome = executor.execute(statement).map_err(Error::Executor)?;
        self.output(outcome)
    }

    /// Like [`run`](Self::run), but `None` when a strict shape has nothing to emit.
    pub(crate) fn run_observed<E>(
        &self,
        executor: &E,
        statement: &BoundStatement,
    ) -> Result<Option<QueryOutput>>
    where
        E: Executor + ?Sized,
    {
        match executor.execute(statement).map_err(Error::Executor)? {
            ExecutionOutcome::Rows(rows) => self.read_mapper()?.map_observed(&rows),
            other => self.output(other).map(Some),
        }
    }

    /// Starts observing the query: evaluates it now, then again each time the
    /// notifier reports a change to one of the tables it reads.
    ///
    /// The arguments are bound once. To observe with different arguments, start
    /// another subscription.
    ///
    /// # Errors
    ///
    /// `IncompatibleReturnType` when the declared shape is not observable, and any
    /// binding error.
    pub fn observe<F>(
        self: &Arc<Self>,
        args: &Arguments,
        executor: Arc<dyn Executor>,
        notifier: Arc<dyn InvalidationNotifier>,
        sink: F,
    ) -> Result<ReactiveSubscription>
    where
        F: Fn(Result<QueryOutput>) + Send + Sync + 'static,
    {
        if !self.definition.returns.is_reactive() {
            return Err(Error::IncompatibleReturnType {
                kind: self.kind.to_string(),
                shape: format!("{} as an observable", self.definition.returns),
            });
        }
        let statement = self.bind(args)?;
        Ok(ReactiveSubscription::start(
            Arc::clone(self),
            statement,
            executor,
            notifier,
            Box::new(sink),
        ))
    }

    fn read_mapper(&self) -> Result<&ResultMapper> {
        self.mapper
            .as_deref()
            .ok_or_else(|| Error::UnexpectedOutcome {
                kind: self.kind.to_string(),
                found: "a row set".to_owned(),
            })
    }

    pub(crate) fn output(&self, outcome: ExecutionOutcome) -> Result<QueryOutput> {
        let returns = &self.definition.returns;
        match (self.kind, outcome) {
            (StatementKind::Read, ExecutionOutcome::Rows(rows)) => self.read_mapper()?.map(&rows),
            (StatementKind::Insert, ExecutionOutcome::RowId(id))
                if matches!(returns, ReturnShape::RowId) =>
            {
                Ok(QueryOutput::RowId(id))
            }
            (
                StatementKind::Update | StatementKind::Delete,
                ExecutionOutcome::RowsAffected(count),
            ) if matches!(returns, ReturnShape::RowCount) => Ok(QueryOutput::RowCount(count)),
            (kind, outcome)
                if !kind.is_read()
                    && matches!(returns, ReturnShape::Void)
                    && !matches!(outcome, ExecutionOutcome::Rows(_)) =>
            {
                Ok(QueryOutput::Unit)
            }
            (kind, outcome) => Err(Error::UnexpectedOutcome {
                kind: kind.to_string(),
                found: outcome.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnusedParameterPolicy;
    use crate::error::BoxError;
    use crate::mapper::Mapped;
    use crate::schema::SchemaSnapshot;
    use crate::shape::RecordShape;
    use crate::value::{RowSet, Value};
    use parking_lot::Mutex;

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table("song", ["id", "name", "release_year", "duration"])
            .with_table("playlist", ["id", "title"])
    }

    fn compile(definition: QueryDefinition) -> Result<PreparedQuery> {
        PreparedQuery::compile(definition, &schema(), &BinderConfig::default())
    }

    /// Records statements and replies with a canned outcome.
    struct StubExecutor {
        reply: ExecutionOutcome,
        seen: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl StubExecutor {
        fn new(reply: ExecutionOutcome) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Executor for StubExecutor {
        fn execute(
            &self,
            statement: &BoundStatement,
        ) -> std::result::Result<ExecutionOutcome, BoxError> {
            self.seen
                .lock()
                .push((statement.sql.clone(), statement.values.clone()));
            Ok(self.reply.clone())
        }
    }

    struct FailingExecutor;

    impl Executor for FailingExecutor {
        fn execute(
            &self,
            _statement: &BoundStatement,
        ) -> std::result::Result<ExecutionOutcome, BoxError> {
            Err("database is locked".into())
        }
    }

    #[test]
    fn test_compile_and_bind_by_year() {
        let query = compile(
            QueryDefinition::new(
                "findSongsByReleaseYear",
                "SELECT * FROM song WHERE release_year = :year",
                ReturnShape::collection(ReturnShape::record(
                    RecordShape::new("Song")
                        .field("id", ValueType::Integer)
                        .field("name", ValueType::Text),
                )),
            )
            .param("year", ValueType::Integer),
        )
        .unwrap();
        assert_eq!(query.kind(), StatementKind::Read);
        assert_eq!(query.tables().iter().collect::<Vec<_>>(), vec!["song"]);

        let mapping = query.column_mapping().unwrap();
        assert_eq!(mapping.matched_count(), 2);
        assert_eq!(
            mapping.warning().unwrap().unused_columns,
            vec!["release_year", "duration"]
        );

        let statement = query.bind(&Arguments::new().with("year", 1995)).unwrap();
        assert_eq!(statement.sql, "SELECT * FROM song WHERE release_year = ?");
        assert_eq!(statement.values, vec![Value::Integer(1995)]);
        assert!(statement.mapper.is_some());
    }

    #[test]
    fn test_compile_rejects_definition_errors() {
        let err = compile(
            QueryDefinition::new(
                "m",
                "SELECT id FROM song WHERE id = :songId",
                ReturnShape::Scalar(ValueType::Integer),
            )
            .param("id", ValueType::Integer),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnresolvedParameter(_)));
        assert!(err.is_definition_time());

        let err = compile(QueryDefinition::new(
            "m",
            "DELETE FROM song",
            ReturnShape::collection(ReturnShape::Scalar(ValueType::Integer)),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::IncompatibleReturnType { .. }));

        let err = compile(QueryDefinition::new(
            "m",
            "SELECT title FROM album",
            ReturnShape::Scalar(ValueType::Text),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::UnknownTable(_)));

        let err = compile(QueryDefinition::new(
            "m",
            "EXPLAIN SELECT 1",
            ReturnShape::Void,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedStatementKind(_)));

        let err = compile(QueryDefinition::new(
            "m",
            "SELECT id, title FROM playlist",
            ReturnShape::record(RecordShape::new("Song").field("name", ValueType::Text)),
        ))
        .unwrap_err();
        assert!(matches!(err, Error::NoMatchingColumns { .. }));
    }

    #[test]
    fn test_compile_unused_parameter_policy() {
        let definition = QueryDefinition::new(
            "m",
            "DELETE FROM song WHERE id = :id",
            ReturnShape::RowCount,
        )
        .param("id", ValueType::Integer)
        .param("force", ValueType::Integer);

        assert!(compile(definition.clone()).is_ok());

        let strict =
            BinderConfig::default().with_unused_parameters(UnusedParameterPolicy::Fail);
        let err = PreparedQuery::compile(definition, &schema(), &strict).unwrap_err();
        assert!(matches!(err, Error::UnusedParameter(p) if p == "force"));
    }

    #[test]
    fn test_compile_static_ceiling() {
        let config = BinderConfig::default().with_max_bind_parameters(1);
        let err = PreparedQuery::compile(
            QueryDefinition::new(
                "m",
                "UPDATE song SET name = :name WHERE id = :id",
                ReturnShape::Void,
            )
            .param("name", ValueType::Text)
            .param("id", ValueType::Integer),
            &schema(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::TooManyBindParameters {
                required: 2,
                limit: 1,
                from_collection: false,
            }
        ));
    }

    #[test]
    fn test_execute_collection_expansion() {
        let query = compile(
            QueryDefinition::new(
                "findNames",
                "SELECT name FROM song WHERE id IN(:songIds)",
                ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
            )
            .collection_param("songIds", ValueType::Integer),
        )
        .unwrap();
        let executor = StubExecutor::new(ExecutionOutcome::Rows(
            RowSet::new(["name"]).with_row(["a"]).with_row(["b"]),
        ));

        let output = query
            .execute(&executor, &Arguments::new().with_list("songIds", [1, 2, 3]))
            .unwrap();
        assert_eq!(
            output,
            QueryOutput::List(vec![
                Mapped::Scalar(Value::from("a")),
                Mapped::Scalar(Value::from("b"))
            ])
        );

        let seen = executor.seen.lock();
        assert_eq!(seen[0].0, "SELECT name FROM song WHERE id IN(?, ?, ?)");
        assert_eq!(
            seen[0].1,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn test_execute_oversized_collection_never_reaches_executor() {
        let query = compile(
            QueryDefinition::new(
                "findNames",
                "SELECT name FROM song WHERE id IN(:ids)",
                ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
            )
            .collection_param("ids", ValueType::Integer),
        )
        .unwrap();
        let executor = StubExecutor::new(ExecutionOutcome::Rows(RowSet::new(["name"])));

        let err = query
            .execute(&executor, &Arguments::new().with_list("ids", 0..1000))
            .unwrap_err();
        assert!(matches!(err, Error::TooManyBindParameters { .. }));
        assert!(executor.seen.lock().is_empty());

        // the failed call leaves the query usable
        let output = query
            .execute(&executor, &Arguments::new().with_list("ids", [1]))
            .unwrap();
        assert_eq!(output, QueryOutput::List(Vec::new()));
    }

    #[test]
    fn test_execute_raw_rows() {
        let query = compile(
            QueryDefinition::new(
                "songsByYear",
                "SELECT id, name FROM song WHERE release_year = :year",
                ReturnShape::Rows,
            )
            .param("year", ValueType::Integer),
        )
        .unwrap();
        assert_eq!(query.result_columns().unwrap(), ["id", "name"]);
        assert!(query.column_mapping().is_none());

        let rows = RowSet::new(["id", "name"])
            .with_row([Value::from(1), Value::from("Intro")])
            .with_row([Value::from(2), Value::Null]);
        let executor = StubExecutor::new(ExecutionOutcome::Rows(rows.clone()));
        let output = query
            .execute(&executor, &Arguments::new().with("year", 1995))
            .unwrap();
        assert_eq!(output, QueryOutput::Rows(rows));

        let err = compile(QueryDefinition::new(
            "touch",
            "DELETE FROM song",
            ReturnShape::Rows,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::IncompatibleReturnType { .. }));
    }

    #[test]
    fn test_execute_scalar_empty_result() {
        let strict = compile(
            QueryDefinition::new(
                "maxYear",
                "SELECT release_year FROM song WHERE name = :name",
                ReturnShape::Scalar(ValueType::Integer),
            )
            .param("name", ValueType::Text),
        )
        .unwrap();
        let optional = compile(
            QueryDefinition::new(
                "maxYear",
                "SELECT release_year FROM song WHERE name = :name",
                ReturnShape::OptionalScalar(ValueType::Integer),
            )
            .param("name", ValueType::Text),
        )
        .unwrap();
        let executor = StubExecutor::new(ExecutionOutcome::Rows(RowSet::new(["release_year"])));
        let args = Arguments::new().with("name", "Intro");

        assert!(matches!(
            strict.execute(&executor, &args),
            Err(Error::EmptyResult)
        ));
        assert_eq!(optional.execute(&executor, &args).unwrap(), QueryOutput::Absent);
    }

    #[test]
    fn test_execute_write_outcomes() {
        let insert = compile(
            QueryDefinition::new(
                "insert",
                "INSERT INTO song (name) VALUES (:name)",
                ReturnShape::RowId,
            )
            .param("name", ValueType::Text),
        )
        .unwrap();
        let args = Arguments::new().with("name", "Intro");
        let output = insert
            .execute(&StubExecutor::new(ExecutionOutcome::RowId(42)), &args)
            .unwrap();
        assert_eq!(output, QueryOutput::RowId(42));
        assert!(insert.bind(&args).unwrap().mapper.is_none());

        let delete = compile(QueryDefinition::new(
            "clear",
            "DELETE FROM song",
            ReturnShape::RowCount,
        ))
        .unwrap();
        let output = delete
            .execute(
                &StubExecutor::new(ExecutionOutcome::RowsAffected(3)),
                &Arguments::new(),
            )
            .unwrap();
        assert_eq!(output, QueryOutput::RowCount(3));

        let err = delete
            .execute(
                &StubExecutor::new(ExecutionOutcome::RowId(1)),
                &Arguments::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedOutcome { .. }));

        let void = compile(QueryDefinition::new(
            "touch",
            "UPDATE song SET duration = 0",
            ReturnShape::Void,
        ))
        .unwrap();
        let output = void
            .execute(
                &StubExecutor::new(ExecutionOutcome::RowsAffected(9)),
                &Arguments::new(),
            )
            .unwrap();
        assert_eq!(output, QueryOutput::Unit);
    }

    #[test]
    fn test_execute_surfaces_executor_errors() {
        let query = compile(QueryDefinition::new(
            "count",
            "SELECT id FROM song",
            ReturnShape::collection(ReturnShape::Scalar(ValueType::Integer)),
        ))
        .unwrap();
        let err = query.execute(&FailingExecutor, &Arguments::new()).unwrap_err();
        assert!(matches!(&err, Error::Executor(source) if source.to_string() == "database is locked"));
        assert_eq!(err.to_string(), "Executor error: database is locked");
    }

    #[test]
    fn test_observe_requires_reactive_shape() {
        let query = Arc::new(
            compile(QueryDefinition::new(
                "all",
                "SELECT id FROM song",
                ReturnShape::collection(ReturnShape::Scalar(ValueType::Integer)),
            ))
            .unwrap(),
        );
        let result = query.observe(
            &Arguments::new(),
            Arc::new(FailingExecutor),
            Arc::new(crate::reactive::InvalidationTracker::new()),
            |_| {},
        );
        assert!(matches!(result, Err(Error::IncompatibleReturnType { .. })));
    }
}
