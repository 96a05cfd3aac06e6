//! Declared return shapes of query methods.

use crate::value::ValueType;
use std::fmt;
use std::sync::Arc;

/// What a query method hands back to its caller.
///
/// Closed union: validation and mapping match over it exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnShape {
    /// Nothing.
    Void,
    /// A single value from a one-column result. Zero rows is an error.
    Scalar(ValueType),
    /// A single value that may be absent.
    OptionalScalar(ValueType),
    /// A single record. Zero rows is an error.
    Record(Arc<RecordShape>),
    /// A single record that may be absent.
    OptionalRecord(Arc<RecordShape>),
    /// Every row, mapped with the inner shape.
    Collection(Box<ReturnShape>),
    /// The inner shape, re-emitted whenever a table the query reads changes.
    Reactive(Box<ReturnShape>),
    /// Number of rows touched by an UPDATE or DELETE.
    RowCount,
    /// Row id of the row created by an INSERT.
    RowId,
    /// The raw result of a read, unmapped.
    Rows,
}

impl ReturnShape {
    pub fn collection(inner: ReturnShape) -> Self {
        ReturnShape::Collection(Box::new(inner))
    }

    pub fn reactive(inner: ReturnShape) -> Self {
        ReturnShape::Reactive(Box::new(inner))
    }

    pub fn record(shape: RecordShape) -> Self {
        ReturnShape::Record(Arc::new(shape))
    }

    pub fn optional_record(shape: RecordShape) -> Self {
        ReturnShape::OptionalRecord(Arc::new(shape))
    }

    pub fn is_reactive(&self) -> bool {
        matches!(self, ReturnShape::Reactive(_))
    }

    /// The shape observed per emission, or the shape itself when not reactive.
    pub fn unwrap_reactive(&self) -> &ReturnShape {
        match self {
            ReturnShape::Reactive(inner) => inner,
            other => other,
        }
    }

    /// The record rows are mapped into, if any.
    pub fn record_shape(&self) -> Option<&Arc<RecordShape>> {
        match self {
            ReturnShape::Record(r) | ReturnShape::OptionalRecord(r) => Some(r),
            ReturnShape::Collection(inner) | ReturnShape::Reactive(inner) => inner.record_shape(),
            _ => None,
        }
    }

    /// True when an empty result is a legal value (absent or empty list).
    pub fn tolerates_empty(&self) -> bool {
        match self {
            ReturnShape::OptionalScalar(_)
            | ReturnShape::OptionalRecord(_)
            | ReturnShape::Collection(_)
            | ReturnShape::Rows => true,
            ReturnShape::Reactive(inner) => inner.tolerates_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnShape::Void => f.write_str("void"),
            ReturnShape::Scalar(ty) => write!(f, "{ty}"),
            ReturnShape::OptionalScalar(ty) => write!(f, "optional {ty}"),
            ReturnShape::Record(r) => write!(f, "record {}", r.name),
            ReturnShape::OptionalRecord(r) => write!(f, "optional record {}", r.name),
            ReturnShape::Collection(inner) => write!(f, "collection of {inner}"),
            ReturnShape::Reactive(inner) => write!(f, "observable {inner}"),
            ReturnShape::RowCount => f.write_str("affected row count"),
            ReturnShape::RowId => f.write_str("row id"),
            ReturnShape::Rows => f.write_str("raw rows"),
        }
    }
}

/// A record type rows are mapped into: the explicit replacement for
/// reflecting over a struct's fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordShape {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

impl RecordShape {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a non-nullable field.
    pub fn field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.fields.push(FieldDecl::new(name, ty));
        self
    }

    /// Adds a field that accepts NULL.
    pub fn nullable_field(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.fields.push(FieldDecl::new(name, ty).nullable());
        self
    }

    /// Adds a field whose column is named differently.
    pub fn renamed_field(
        mut self,
        name: impl Into<String>,
        column: impl Into<String>,
        ty: ValueType,
    ) -> Self {
        self.fields.push(FieldDecl::new(name, ty).column(column));
        self
    }
}

/// One field of a [`RecordShape`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    /// Column name override, checked when the field name itself is not a column.
    pub column: Option<String>,
    pub ty: ValueType,
    pub nullable: bool,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            column: None,
            ty,
            nullable: false,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}
