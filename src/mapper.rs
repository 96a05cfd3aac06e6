//! Column to field mapping for read statements.
//!
//! The mapping strategy is derived once per method from the declared
//! [`ReturnShape`] and, when static analysis knows them, the result column
//! names. It is applied fresh to every [`RowSet`] an execution returns.

use crate::error::{Error, Result};
use crate::shape::{RecordShape, ReturnShape};
use crate::value::{RowSet, Value, ValueType};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// How one result column is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnBinding {
    pub column_name: String,
    pub target_field: Option<String>,
    pub matched: bool,
}

/// Non-fatal report of columns and fields that did not line up.
///
/// Mapping still proceeds with whatever matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMismatchWarning {
    pub record: String,
    /// Result columns no field consumes.
    pub unused_columns: Vec<String>,
    /// Record fields no column feeds.
    pub unset_fields: Vec<String>,
}

impl fmt::Display for ColumnMismatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "The query returns some columns that do not match '{}'", self.record)?;
        if !self.unused_columns.is_empty() {
            write!(f, "; unused columns: {}", self.unused_columns.join(", "))?;
        }
        if !self.unset_fields.is_empty() {
            write!(f, "; fields not set: {}", self.unset_fields.join(", "))?;
        }
        Ok(())
    }
}

/// Column to field mapping table for one record shape and one column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub columns: Vec<ColumnBinding>,
    /// Column index feeding each record field, in field order.
    field_sources: Vec<Option<usize>>,
    warning: Option<ColumnMismatchWarning>,
}

impl ColumnMapping {
    /// Matches `columns` to the fields of `record` by name.
    ///
    /// A field is fed by the column carrying its exact name, or failing that its
    /// declared column override. A field for which both exist as different
    /// columns, or a column claimed by two fields, is ambiguous. At least one
    /// field must match.
    pub fn for_record(record: &RecordShape, columns: &[String]) -> Result<Self> {
        let position = |name: &str| columns.iter().position(|c| c == name);
        let ambiguous = |column: &str, reason: String| Error::AmbiguousColumn {
            record: record.name.clone(),
            column: column.to_owned(),
            reason,
        };

        let mut owners: Vec<Option<usize>> = vec![None; columns.len()];
        let mut field_sources = Vec::with_capacity(record.fields.len());
        for (field_idx, field) in record.fields.iter().enumerate() {
            let exact = position(&field.name);
            let renamed = field.column.as_deref().and_then(position);
            let source = match (exact, renamed) {
                (Some(a), Some(b)) if a != b => {
                    return Err(ambiguous(
                        &columns[b],
                        format!(
                            "field '{}' matches both '{}' and its override",
                            field.name, columns[a]
                        ),
                    ))
                }
                (Some(a), _) => Some(a),
                (None, b) => b,
            };
            if let Some(col) = source {
                if let Some(other) = owners[col] {
                    return Err(ambiguous(
                        &columns[col],
                        format!(
                            "claimed by fields '{}' and '{}'",
                            record.fields[other].name, field.name
                        ),
                    ));
                }
                owners[col] = Some(field_idx);
            }
            field_sources.push(source);
        }

        if field_sources.iter().all(Option::is_none) {
            return Err(Error::NoMatchingColumns {
                record: record.name.clone(),
                columns: columns.to_vec(),
            });
        }

        let bindings: Vec<ColumnBinding> = columns
            .iter()
            .zip(&owners)
            .map(|(column, owner)| ColumnBinding {
                column_name: column.clone(),
                target_field: owner.map(|f| record.fields[f].name.clone()),
                matched: owner.is_some(),
            })
            .collect();

        let unused_columns: Vec<String> = bindings
            .iter()
            .filter(|b| !b.matched)
            .map(|b| b.column_name.clone())
            .collect();
        let unset_fields: Vec<String> = record
            .fields
            .iter()
            .zip(&field_sources)
            .filter(|(_, source)| source.is_none())
            .map(|(field, _)| field.name.clone())
            .collect();
        let warning = if unused_columns.is_empty() && unset_fields.is_empty() {
            None
        } else {
            let warning = ColumnMismatchWarning {
                record: record.name.clone(),
                unused_columns,
                unset_fields,
            };
            warn!("{warning}");
            Some(warning)
        };

        Ok(Self {
            columns: bindings,
            field_sources,
            warning,
        })
    }

    pub fn warning(&self) -> Option<&ColumnMismatchWarning> {
        self.warning.as_ref()
    }

    pub fn matched_count(&self) -> usize {
        self.columns.iter().filter(|b| b.matched).count()
    }

    fn fits(&self, columns: &[String]) -> bool {
        self.columns.len() == columns.len()
            && self
                .columns
                .iter()
                .zip(columns)
                .all(|(binding, column)| &binding.column_name == column)
    }
}

/// A record built from one row. Fields without a matching column are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub record: String,
    fields: Vec<(String, Value)>,
}

impl MappedRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// One mapped row.
#[derive(Debug, Clone, PartialEq)]
pub enum Mapped {
    Scalar(Value),
    Record(MappedRecord),
}

/// What a query method returns to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Unit,
    Value(Mapped),
    /// An optional single result with nothing in it.
    Absent,
    List(Vec<Mapped>),
    RowCount(u64),
    RowId(i64),
    /// The result exactly as the executor returned it.
    Rows(RowSet),
}

/// Checks a non-null result value against its declared type. Integers widen
/// into real columns.
fn typed(column: impl Fn() -> String, expected: ValueType, value: Value) -> Result<Value> {
    match (expected, value) {
        (ValueType::Real, Value::Integer(v)) => Ok(Value::Real(v as f64)),
        (_, value) => match value.value_type() {
            Some(found) if found != expected => Err(Error::ColumnTypeMismatch {
                column: column(),
                expected,
                found,
            }),
            _ => Ok(value),
        },
    }
}

enum RowStrategy<'r> {
    Scalar {
        column: &'r str,
        ty: ValueType,
        nullable: bool,
    },
    Record {
        shape: &'r RecordShape,
        mapping: Cow<'r, ColumnMapping>,
    },
}

impl RowStrategy<'_> {
    fn apply(&self, row: &[Value]) -> Result<Mapped> {
        match self {
            RowStrategy::Scalar {
                column,
                ty,
                nullable,
            } => {
                let value = row.first().cloned().unwrap_or(Value::Null);
                if value.is_null() && !nullable {
                    return Err(Error::UnexpectedNull((*column).to_owned()));
                }
                Ok(Mapped::Scalar(typed(|| (*column).to_owned(), *ty, value)?))
            }
            RowStrategy::Record { shape, mapping } => {
                let mut fields = Vec::with_capacity(shape.fields.len());
                for (field, source) in shape.fields.iter().zip(&mapping.field_sources) {
                    let Some(col) = source else { continue };
                    let value = row.get(*col).cloned().unwrap_or(Value::Null);
                    if value.is_null() && !field.nullable {
                        return Err(Error::UnexpectedNull(format!(
                            "{}.{}",
                            shape.name, field.name
                        )));
                    }
                    let value = typed(|| format!("{}.{}", shape.name, field.name), field.ty, value)?;
                    fields.push((field.name.clone(), value));
                }
                Ok(Mapped::Record(MappedRecord {
                    record: shape.name.clone(),
                    fields,
                }))
            }
        }
    }
}

/// Lazy, finite sequence of mapped rows. Ask the mapper again to restart it.
pub struct MappedRows<'r> {
    strategy: Option<RowStrategy<'r>>,
    rows: std::slice::Iter<'r, Vec<Value>>,
}

impl Iterator for MappedRows<'_> {
    type Item = Result<Mapped>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        self.strategy.as_ref().map(|strategy| strategy.apply(row))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

/// Maps the rows of a read statement into its declared shape.
#[derive(Debug, Clone)]
pub struct ResultMapper {
    shape: ReturnShape,
    planned: Option<Arc<ColumnMapping>>,
}

impl ResultMapper {
    /// Plans the mapping for a read shape. Reactive shapes are mapped as the
    /// shape they observe.
    ///
    /// With `columns` known, scalar column counts and record field matches are
    /// checked now instead of on the first execution.
    pub fn new(shape: &ReturnShape, columns: Option<&[String]>) -> Result<Self> {
        let shape = shape.unwrap_reactive().clone();
        let mut planned = None;
        if let Some(columns) = columns {
            match element_shape(&shape) {
                ReturnShape::Scalar(_) | ReturnShape::OptionalScalar(_) if columns.len() != 1 => {
                    return Err(Error::ScalarColumnCount(columns.len()));
                }
                ReturnShape::Record(record) | ReturnShape::OptionalRecord(record) => {
                    planned = Some(Arc::new(ColumnMapping::for_record(record, columns)?));
                }
                _ => {}
            }
        }
        Ok(Self { shape, planned })
    }

    pub fn shape(&self) -> &ReturnShape {
        &self.shape
    }

    /// The mapping planned ahead of execution, if the columns were known.
    pub fn planned(&self) -> Option<&ColumnMapping> {
        self.planned.as_deref()
    }

    /// Mapping for a concrete result, reusing the planned one when the columns
    /// are the ones it was planned for.
    pub fn mapping_for<'r>(&'r self, rows: &RowSet) -> Result<Option<Cow<'r, ColumnMapping>>> {
        let Some(record) = element_shape(&self.shape).record_shape() else {
            return Ok(None);
        };
        match self.planned.as_deref() {
            Some(planned) if planned.fits(&rows.columns) => Ok(Some(Cow::Borrowed(planned))),
            _ => ColumnMapping::for_record(record, &rows.columns).map(|m| Some(Cow::Owned(m))),
        }
    }

    fn strategy<'r>(&'r self, rows: &'r RowSet) -> Result<RowStrategy<'r>> {
        match element_shape(&self.shape) {
            ReturnShape::Scalar(ty) | ReturnShape::OptionalScalar(ty) => {
                // the header differs from what was analyzed
                if rows.columns.len() != 1 {
                    return Err(Error::UnexpectedOutcome {
                        kind: "SELECT".to_owned(),
                        found: format!("{} columns for a scalar result", rows.columns.len()),
                    });
                }
                Ok(RowStrategy::Scalar {
                    column: &rows.columns[0],
                    ty: *ty,
                    nullable: matches!(element_shape(&self.shape), ReturnShape::OptionalScalar(_)),
                })
            }
            ReturnShape::Record(shape) | ReturnShape::OptionalRecord(shape) => {
                let mapping = match self.mapping_for(rows)? {
                    Some(mapping) => mapping,
                    None => Cow::Owned(ColumnMapping::for_record(shape, &rows.columns)?),
                };
                Ok(RowStrategy::Record { shape, mapping })
            }
            other => Err(Error::IncompatibleReturnType {
                kind: "SELECT".to_owned(),
                shape: other.to_string(),
            }),
        }
    }

    /// Lazily maps every row with the per-row strategy.
    pub fn rows<'r>(&'r self, rows: &'r RowSet) -> Result<MappedRows<'r>> {
        let strategy = if rows.is_empty() {
            None
        } else {
            Some(self.strategy(rows)?)
        };
        Ok(MappedRows {
            strategy,
            rows: rows.rows.iter(),
        })
    }

    /// Maps a result into the declared shape.
    ///
    /// Strict single shapes fail with `EmptyResult` on zero rows; optional ones
    /// yield [`QueryOutput::Absent`]. Single shapes use the first row.
    pub fn map(&self, rows: &RowSet) -> Result<QueryOutput> {
        match &self.shape {
            ReturnShape::Rows => Ok(QueryOutput::Rows(rows.clone())),
            ReturnShape::Collection(_) => {
                let mapped = self.rows(rows)?.collect::<Result<Vec<_>>>()?;
                Ok(QueryOutput::List(mapped))
            }
            ReturnShape::Scalar(_) | ReturnShape::Record(_) => match self.rows(rows)?.next() {
                Some(mapped) => Ok(QueryOutput::Value(mapped?)),
                None => Err(Error::EmptyResult),
            },
            ReturnShape::OptionalScalar(_) | ReturnShape::OptionalRecord(_) => {
                match self.rows(rows)?.next() {
                    Some(Ok(Mapped::Scalar(Value::Null))) | None => Ok(QueryOutput::Absent),
                    Some(mapped) => Ok(QueryOutput::Value(mapped?)),
                }
            }
            other => Err(Error::IncompatibleReturnType {
                kind: "SELECT".to_owned(),
                shape: other.to_string(),
            }),
        }
    }

    /// Maps a result for an observer.
    ///
    /// Returns `None` when a strict shape has nothing to emit (zero rows, or a
    /// NULL scalar): absence is not representable there, so the tick is skipped.
    pub fn map_observed(&self, rows: &RowSet) -> Result<Option<QueryOutput>> {
        match &self.shape {
            ReturnShape::Scalar(_) | ReturnShape::Record(_) if rows.is_empty() => Ok(None),
            ReturnShape::Scalar(_)
                if rows.rows[0].first().map_or(true, Value::is_null) =>
            {
                Ok(None)
            }
            _ => self.map(rows).map(Some),
        }
    }
}

fn element_shape(shape: &ReturnShape) -> &ReturnShape {
    match shape {
        ReturnShape::Collection(inner) => inner,
        other => other,
    }
}
