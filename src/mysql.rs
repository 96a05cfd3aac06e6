//! Running bound statements on SQLx MySQL executors.

use crate::binder::Arguments;
use crate::classifier::StatementKind;
use crate::error::{Error, Result};
use crate::executor::{BoundStatement, ExecutionOutcome};
use crate::mapper::QueryOutput;
use crate::query::PreparedQuery;
use crate::value::{RowSet, Value};
use sqlx::{
    mysql::{MySqlArguments, MySqlRow},
    query::Query,
    types::{
        chrono::{NaiveDate, NaiveDateTime, NaiveTime},
        Decimal,
    },
    Column, MySql, Row,
};
use std::fmt::Display;

/// Type alias for SQLx Query with MySQL arguments
pub type Q<'q> = Query<'q, MySql, MySqlArguments>;

impl BoundStatement {
    /// Builds a fresh SQLx query with every value bound in marker order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sqlx::Execute;
    /// use sqlx_named_query::prelude::*;
    ///
    /// let schema = SchemaSnapshot::new().with_table("song", ["id", "name"]);
    /// let query = PreparedQuery::compile(
    ///     QueryDefinition::new(
    ///         "findNames",
    ///         "SELECT name FROM song WHERE id IN(:ids)",
    ///         ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
    ///     )
    ///     .collection_param("ids", ValueType::Integer),
    ///     &schema,
    ///     &BinderConfig::default(),
    /// )?;
    /// let statement = query.bind(&Arguments::new().with_list("ids", [1, 2]))?;
    /// assert_eq!(statement.to_query().sql(), "SELECT name FROM song WHERE id IN(?, ?)");
    /// # Ok::<(), sqlx_named_query::Error>(())
    /// ```
    pub fn to_query(&self) -> Q<'_> {
        self.values
            .iter()
            .fold(sqlx::query::<MySql>(&self.sql), bind_value)
    }
}

fn bind_value<'q>(q: Q<'q>, value: &'q Value) -> Q<'q> {
    match value {
        Value::Null => q.bind(None::<i64>),
        Value::Integer(v) => q.bind(*v),
        Value::Real(v) => q.bind(*v),
        Value::Text(v) => q.bind(v.as_str()),
        Value::Blob(v) => q.bind(v.as_slice()),
    }
}

/// Runs `statement` on any SQLx MySQL executor: a pool, a connection or a
/// transaction.
///
/// Reads come back as a [`RowSet`], inserts as the last insert id and the other
/// writes as the affected row count.
///
/// # Errors
///
/// `Database` for anything SQLx reports.
pub async fn execute<'e, E>(statement: &BoundStatement, executor: E) -> Result<ExecutionOutcome>
where
    E: sqlx::Executor<'e, Database = MySql>,
{
    let q = statement.to_query();
    match statement.kind {
        StatementKind::Read => {
            let rows = q.fetch_all(executor).await?;
            Ok(ExecutionOutcome::Rows(to_row_set(&rows)?))
        }
        StatementKind::Insert => {
            let done = q.execute(executor).await?;
            let id = i64::try_from(done.last_insert_id()).map_err(|_| Error::UnexpectedOutcome {
                kind: StatementKind::Insert.to_string(),
                found: format!("row id {} out of range", done.last_insert_id()),
            })?;
            Ok(ExecutionOutcome::RowId(id))
        }
        StatementKind::Update | StatementKind::Delete => {
            let done = q.execute(executor).await?;
            Ok(ExecutionOutcome::RowsAffected(done.rows_affected()))
        }
    }
}

fn to_row_set(rows: &[MySqlRow]) -> Result<RowSet> {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_owned()).collect())
        .unwrap_or_default();
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| decode(row, i)).collect::<Result<Vec<_>>>())
        .collect::<Result<_>>()?;
    Ok(RowSet { columns, rows })
}

// NULL decodes through the first attempt whatever the column type.
fn decode(row: &MySqlRow, index: usize) -> Result<Value> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Integer));
    }
    if let Ok(v) = row.try_get::<Option<u64>, _>(index) {
        return Ok(v.map_or(Value::Null, unsigned));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Real));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Text));
    }
    // exact and temporal values keep their textual form
    if let Ok(v) = row.try_get::<Option<Decimal>, _>(index) {
        return Ok(text(v));
    }
    if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return Ok(text(v));
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(index) {
        return Ok(text(v));
    }
    if let Ok(v) = row.try_get::<Option<NaiveTime>, _>(index) {
        return Ok(text(v));
    }
    let v = row.try_get::<Option<Vec<u8>>, _>(index)?;
    Ok(v.map_or(Value::Null, Value::Blob))
}

fn unsigned(v: u64) -> Value {
    i64::try_from(v).map_or_else(|_| Value::Text(v.to_string()), Value::Integer)
}

fn text<T: Display>(v: Option<T>) -> Value {
    v.map_or(Value::Null, |v| Value::Text(v.to_string()))
}

impl PreparedQuery {
    /// Binds, runs on a SQLx MySQL executor and maps a call.
    ///
    /// Binding errors are reported before anything reaches the database.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use sqlx::MySqlPool;
    /// use sqlx_named_query::prelude::*;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let pool = MySqlPool::connect("mysql://localhost/music").await?;
    /// let schema = SchemaSnapshot::new().with_table("song", ["id", "name", "release_year"]);
    ///
    /// let query = PreparedQuery::compile(
    ///     QueryDefinition::new(
    ///         "findSongsByReleaseYear",
    ///         "SELECT name FROM song WHERE release_year = :year",
    ///         ReturnShape::collection(ReturnShape::Scalar(ValueType::Text)),
    ///     )
    ///     .param("year", ValueType::Integer),
    ///     &schema,
    ///     &BinderConfig::default(),
    /// )?;
    ///
    /// let names = query.fetch(&Arguments::new().with("year", 1995), &pool).await?;
    /// println!("{names:?}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn fetch<'e, E>(&self, args: &Arguments, executor: E) -> Result<QueryOutput>
    where
        E: sqlx::Executor<'e, Database = MySql>,
    {
        let statement = self.bind(args)?;
        let outcome = execute(&statement, executor).await?;
        self.output(outcome)
    }
}
