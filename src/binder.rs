//! Matching method parameters to placeholders, and per-call binding.
//!
//! Resolution runs once per method and produces the [`BindArgument`] set.
//! Binding runs on every call: it checks the supplied [`Arguments`], expands
//! collection arguments and produces positional SQL with its values.

use crate::builder::build_query;
use crate::config::{BinderConfig, UnusedParameterPolicy};
use crate::error::{Error, Result};
use crate::scanner::{BindMarker, Placeholder};
use crate::value::{Value, ValueType};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// A parameter of the query method, as declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDecl {
    pub name: String,
    pub ty: ValueType,
    pub is_collection: bool,
}

impl ParameterDecl {
    pub fn single(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            is_collection: false,
        }
    }

    pub fn collection(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            is_collection: true,
        }
    }
}

/// A placeholder name resolved to the method parameter that feeds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindArgument {
    pub name: String,
    pub declared_type: ValueType,
    pub is_collection: bool,
}

/// Value supplied for one parameter on one call.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Single(Value),
    List(Vec<Value>),
}

/// Argument snapshot of a single call.
///
/// # Examples
///
/// ```
/// use sqlx_named_query::binder::Arguments;
///
/// let args = Arguments::new()
///     .with("year", 1995)
///     .with_list("songIds", [1, 2, 3]);
/// assert!(args.get("year").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    named: HashMap<String, ArgumentValue>,
    positional: Vec<Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies a single value for `name`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named
            .insert(name.into(), ArgumentValue::Single(value.into()));
        self
    }

    /// Supplies a collection for `name`, bound in iteration order.
    pub fn with_list<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.named.insert(name.into(), ArgumentValue::List(values));
        self
    }

    /// Supplies the value of the next `?` written directly in the SQL.
    pub fn with_positional(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgumentValue> {
        self.named.get(name)
    }
}

/// Resolves every distinct placeholder name to exactly one method parameter.
///
/// Matching is by exact, case-sensitive name. Parameters whose names collide
/// exactly or differ only by case are rejected outright, so a placeholder can
/// never be matched ambiguously. The result is ordered by first occurrence.
pub fn resolve<'a, I>(
    placeholders: I,
    params: &[ParameterDecl],
    policy: UnusedParameterPolicy,
) -> Result<Vec<BindArgument>>
where
    I: IntoIterator<Item = &'a Placeholder>,
{
    check_ambiguous(params)?;

    let mut seen = HashSet::new();
    let mut arguments = Vec::new();
    for placeholder in placeholders {
        if !seen.insert(placeholder.name.as_str()) {
            continue;
        }
        let param = params
            .iter()
            .find(|p| p.name == placeholder.name)
            .ok_or_else(|| Error::UnresolvedParameter(placeholder.name.clone()))?;
        arguments.push(BindArgument {
            name: param.name.clone(),
            declared_type: param.ty,
            is_collection: param.is_collection,
        });
    }

    for param in params.iter().filter(|p| !seen.contains(p.name.as_str())) {
        match policy {
            UnusedParameterPolicy::Fail => return Err(Error::UnusedParameter(param.name.clone())),
            UnusedParameterPolicy::Warn => {
                warn!(parameter = %param.name, "parameter is not used by the query")
            }
        }
    }

    Ok(arguments)
}

fn check_ambiguous(params: &[ParameterDecl]) -> Result<()> {
    let mut groups: HashMap<String, Vec<&str>> = HashMap::new();
    for param in params {
        groups
            .entry(param.name.to_ascii_lowercase())
            .or_default()
            .push(&param.name);
    }
    if let Some(group) = params
        .iter()
        .filter_map(|p| groups.get(&p.name.to_ascii_lowercase()))
        .find(|group| group.len() > 1)
    {
        return Err(Error::AmbiguousParameter {
            name: group[0].to_owned(),
            candidates: group[1..].iter().map(|s| (*s).to_owned()).collect(),
        });
    }
    Ok(())
}

/// Number of `?` markers the statement carries when no argument is a collection.
pub fn fixed_marker_count(markers: &[BindMarker], arguments: &[BindArgument]) -> Option<usize> {
    if arguments.iter().any(|a| a.is_collection) {
        None
    } else {
        Some(markers.len())
    }
}

/// Positional SQL and its values for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub sql: String,
    pub values: Vec<Value>,
}

/// Binds one call's arguments against a resolved query.
///
/// Collection arguments expand into one marker per item. The total marker count
/// is checked against the configured ceiling before any SQL is built.
pub fn bind(
    template: &str,
    markers: &[BindMarker],
    arguments: &[BindArgument],
    args: &Arguments,
    config: &BinderConfig,
) -> Result<Binding> {
    let mut supplied: HashMap<&str, &ArgumentValue> = HashMap::with_capacity(arguments.len());
    for argument in arguments {
        let value = args
            .get(&argument.name)
            .ok_or_else(|| Error::MissingArgument(argument.name.clone()))?;
        check_argument(argument, value)?;
        supplied.insert(&argument.name, value);
    }

    let arity = |placeholder: &Placeholder| match supplied.get(placeholder.name.as_str()) {
        Some(ArgumentValue::List(items)) => items.len(),
        _ => 1,
    };

    let positional = markers
        .iter()
        .filter(|m| matches!(m, BindMarker::Positional { .. }))
        .count();
    if args.positional.len() < positional {
        return Err(Error::MissingArgument(format!(
            "?{}",
            args.positional.len() + 1
        )));
    }
    if args.positional.len() > positional {
        return Err(Error::ArgumentMismatch {
            name: "?".to_owned(),
            reason: format!(
                "{} positional values supplied for {positional} markers",
                args.positional.len()
            ),
        });
    }

    let required: usize = markers
        .iter()
        .map(|m| m.as_named().map_or(1, &arity))
        .sum();
    if required > config.max_bind_parameters {
        return Err(Error::TooManyBindParameters {
            required,
            limit: config.max_bind_parameters,
            from_collection: arguments.iter().any(|a| a.is_collection),
        });
    }

    let mut values = Vec::with_capacity(required);
    let mut positional_values = args.positional.iter();
    for marker in markers {
        match marker {
            BindMarker::Named(placeholder) => match supplied.get(placeholder.name.as_str()) {
                Some(ArgumentValue::Single(value)) => values.push(value.clone()),
                Some(ArgumentValue::List(items)) => values.extend(items.iter().cloned()),
                None => return Err(Error::UnresolvedParameter(placeholder.name.clone())),
            },
            BindMarker::Positional { .. } => {
                if let Some(value) = positional_values.next() {
                    values.push(value.clone());
                }
            }
        }
    }

    let sql = build_query(template, markers, arity);
    debug!(markers = required, "bound query");
    Ok(Binding { sql, values })
}

fn check_argument(argument: &BindArgument, value: &ArgumentValue) -> Result<()> {
    let mismatch = |reason: String| Error::ArgumentMismatch {
        name: argument.name.clone(),
        reason,
    };
    let items: &[Value] = match (argument.is_collection, value) {
        (true, ArgumentValue::List(items)) => items,
        (false, ArgumentValue::Single(value)) => std::slice::from_ref(value),
        (true, ArgumentValue::Single(_)) => {
            return Err(mismatch("expected a collection, got a single value".into()))
        }
        (false, ArgumentValue::List(_)) => {
            return Err(mismatch("expected a single value, got a collection".into()))
        }
    };
    for item in items {
        if let Some(found) = item.value_type() {
            let widening = argument.declared_type == ValueType::Real && found == ValueType::Integer;
            if found != argument.declared_type && !widening {
                return Err(mismatch(format!(
                    "expected {}, got {found}",
                    argument.declared_type
                )));
            }
        }
    }
    Ok(())
}
