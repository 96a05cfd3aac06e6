//! The executor collaborator and the statements handed to it.

use crate::classifier::StatementKind;
use crate::error::BoxError;
use crate::mapper::ResultMapper;
use crate::value::{RowSet, Value};
use std::fmt;
use std::sync::Arc;

/// A fully bound statement: positional SQL plus its values, in marker order.
///
/// Built fresh for every call, since collection arguments change the number of
/// markers. Never cache one across calls.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<Value>,
    pub kind: StatementKind,
    /// Row mapping for read statements.
    pub mapper: Option<Arc<ResultMapper>>,
}

/// What running a statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Rows(RowSet),
    RowsAffected(u64),
    RowId(i64),
}

impl ExecutionOutcome {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            ExecutionOutcome::Rows(_) => "a row set",
            ExecutionOutcome::RowsAffected(_) => "an affected row count",
            ExecutionOutcome::RowId(_) => "a row id",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Synchronous "run this statement" capability supplied by the caller.
///
/// Implementations should return [`ExecutionOutcome::Rows`] for reads,
/// [`ExecutionOutcome::RowId`] for inserts and [`ExecutionOutcome::RowsAffected`]
/// for updates and deletes. Failures are surfaced to callers wrapped in
/// `Error::Executor`.
pub trait Executor: Send + Sync {
    fn execute(&self, statement: &BoundStatement) -> Result<ExecutionOutcome, BoxError>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, statement: &BoundStatement) -> Result<ExecutionOutcome, BoxError> {
        (**self).execute(statement)
    }
}

impl<E: Executor + ?Sized> Executor for &E {
    fn execute(&self, statement: &BoundStatement) -> Result<ExecutionOutcome, BoxError> {
        (**self).execute(statement)
    }
}
