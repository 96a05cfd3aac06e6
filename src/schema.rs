//! Schema-aware validation.
//!
//! This is best-effort static analysis over a token stream, not a SQL grammar:
//! it finds the tables a statement references, infers result column names from
//! the select list when it can, and checks what it can check against the
//! schema. Anything it cannot determine is left to the engine.

use crate::classifier::StatementKind;
use crate::error::{Error, Result};
use crate::scanner::{is_ident_start, mask_literals, QueryText};
use crate::shape::ReturnShape;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;
use tracing::debug;

/// Read-only view of the database schema, owned by the caller.
pub trait SchemaSource: Send + Sync {
    fn list_tables(&self) -> BTreeSet<String>;

    /// Columns of `table` in declaration order. Empty for unknown tables.
    fn list_columns(&self, table: &str) -> Vec<String>;
}

/// In-memory [`SchemaSource`].
///
/// # Examples
///
/// ```
/// use sqlx_named_query::schema::{SchemaSnapshot, SchemaSource};
///
/// let schema = SchemaSnapshot::new().with_table("song", ["id", "name", "release_year"]);
/// assert!(schema.list_tables().contains("song"));
/// assert_eq!(schema.list_columns("song").len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, Vec<String>>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .insert(name.into(), columns.into_iter().map(Into::into).collect());
        self
    }
}

impl SchemaSource for SchemaSnapshot {
    fn list_tables(&self) -> BTreeSet<String> {
        self.tables.keys().cloned().collect()
    }

    fn list_columns(&self, table: &str) -> Vec<String> {
        self.tables.get(table).cloned().unwrap_or_default()
    }
}

/// What static analysis learned about a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryAnalysis {
    /// Schema tables the statement references, by their schema names.
    pub tables: BTreeSet<String>,
    /// Result column names, when the select list makes them knowable.
    pub result_columns: Option<Vec<String>>,
}

/// Checks the return-shape policy for a statement kind.
///
/// Reads may return scalars, records, collections of either, or an observable
/// of any of those. Inserts return nothing or a row id, updates and deletes
/// nothing or an affected row count.
pub fn check_return_shape(kind: StatementKind, shape: &ReturnShape) -> Result<()> {
    let allowed = match kind {
        StatementKind::Read => match shape {
            ReturnShape::Reactive(inner) => is_read_value(inner),
            other => is_read_value(other),
        },
        StatementKind::Insert => matches!(shape, ReturnShape::Void | ReturnShape::RowId),
        StatementKind::Update | StatementKind::Delete => {
            matches!(shape, ReturnShape::Void | ReturnShape::RowCount)
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::IncompatibleReturnType {
            kind: kind.to_string(),
            shape: shape.to_string(),
        })
    }
}

fn is_read_value(shape: &ReturnShape) -> bool {
    match shape {
        ReturnShape::Scalar(_)
        | ReturnShape::OptionalScalar(_)
        | ReturnShape::Record(_)
        | ReturnShape::OptionalRecord(_)
        | ReturnShape::Rows => true,
        ReturnShape::Collection(inner) => matches!(
            **inner,
            ReturnShape::Scalar(_) | ReturnShape::OptionalScalar(_) | ReturnShape::Record(_)
        ),
        ReturnShape::Reactive(_)
        | ReturnShape::Void
        | ReturnShape::RowCount
        | ReturnShape::RowId => false,
    }
}

/// Validates query text against a schema.
pub struct SchemaValidator<'a> {
    schema: &'a dyn SchemaSource,
    tables: BTreeSet<String>,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(schema: &'a dyn SchemaSource) -> Self {
        Self {
            tables: schema.list_tables(),
            schema,
        }
    }

    /// Resolves referenced tables and checks the columns that can be checked.
    pub fn analyze(&self, text: &QueryText, kind: StatementKind) -> Result<QueryAnalysis> {
        let tokens = tokenize(text.as_str())?;
        let walk = Walk::new(&tokens);

        let mut tables = BTreeSet::new();
        for table_ref in &walk.refs {
            if let Some(table) = self.resolve_table(&walk, &table_ref.name)? {
                tables.insert(table);
            }
        }

        for (table, column) in &walk.target_columns {
            if let Some(table) = self.resolve_table(&walk, table)? {
                self.check_column(column, &[table])?;
            }
        }

        let result_columns = if kind.is_read() {
            self.result_columns(&walk)?
        } else {
            None
        };

        debug!(
            method = text.method(),
            tables = ?tables,
            columns = ?result_columns,
            "analyzed query"
        );
        Ok(QueryAnalysis {
            tables,
            result_columns,
        })
    }

    /// Schema name of `name`, `None` for CTE names.
    fn resolve_table(&self, walk: &Walk, name: &str) -> Result<Option<String>> {
        if walk.ctes.contains(&name.to_ascii_lowercase()) {
            return Ok(None);
        }
        self.tables
            .iter()
            .find(|t| t.eq_ignore_ascii_case(name))
            .map(|t| Some(t.clone()))
            .ok_or_else(|| Error::UnknownTable(name.to_owned()))
    }

    fn check_column(&self, column: &str, tables: &[String]) -> Result<()> {
        let known = tables.iter().any(|table| {
            self.schema
                .list_columns(table)
                .iter()
                .any(|c| c.eq_ignore_ascii_case(column))
        });
        if known {
            Ok(())
        } else {
            Err(Error::UnknownColumn {
                column: column.to_owned(),
                tables: tables.to_vec(),
            })
        }
    }

    /// Infers result column names from the outermost select list.
    ///
    /// Bare and qualified column references are checked against the schema on
    /// the way. Returns `None` when any item's name is not knowable.
    fn result_columns(&self, walk: &Walk) -> Result<Option<Vec<String>>> {
        let Some(items) = walk.select_items() else {
            return Ok(None);
        };

        // tables of the outermost FROM, with their aliases
        let mut sources = Vec::new();
        for table_ref in walk.refs.iter().filter(|r| r.depth == 0) {
            sources.push((self.resolve_table(walk, &table_ref.name)?, table_ref));
        }
        let all_known = sources.iter().all(|(t, _)| t.is_some());
        let source_tables: Vec<String> = sources.iter().filter_map(|(t, _)| t.clone()).collect();
        let lookup = |qualifier: &str| {
            sources
                .iter()
                .find(|(_, r)| {
                    r.alias
                        .as_deref()
                        .is_some_and(|a| a.eq_ignore_ascii_case(qualifier))
                        || r.name.eq_ignore_ascii_case(qualifier)
                })
                .map(|(t, _)| t.clone())
        };

        let mut columns = Some(Vec::new());
        for item in items {
            let named = match SelectItem::classify(item) {
                SelectItem::Star => {
                    if all_known && !source_tables.is_empty() {
                        Some(
                            source_tables
                                .iter()
                                .flat_map(|t| self.schema.list_columns(t))
                                .collect(),
                        )
                    } else {
                        None
                    }
                }
                SelectItem::QualifiedStar(qualifier) => match lookup(qualifier) {
                    Some(Some(table)) => Some(self.schema.list_columns(&table)),
                    _ => None,
                },
                SelectItem::Column(column) => {
                    if all_known && !source_tables.is_empty() {
                        self.check_column(column, &source_tables)?;
                    }
                    Some(vec![column.to_owned()])
                }
                SelectItem::QualifiedColumn(qualifier, column) => {
                    if let Some(Some(table)) = lookup(qualifier) {
                        self.check_column(column, &[table])?;
                    }
                    Some(vec![column.to_owned()])
                }
                SelectItem::Aliased(alias) => Some(vec![alias.to_owned()]),
                SelectItem::Opaque => None,
            };
            match named {
                Some(named) => {
                    if let Some(columns) = columns.as_mut() {
                        columns.extend(named);
                    }
                }
                None => columns = None,
            }
        }
        Ok(columns)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident { text: String, quoted: bool },
    Literal,
    Punct(char),
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident { text, quoted: false } if text.eq_ignore_ascii_case(keyword))
    }

    fn ident(&self) -> Option<&str> {
        match self {
            Token::Ident { text, .. } => Some(text),
            _ => None,
        }
    }

    /// An identifier that can name a table, column or alias.
    fn name(&self) -> Option<&str> {
        match self {
            Token::Ident { text, quoted: true } => Some(text),
            Token::Ident { text, quoted: false } if !is_reserved(text) => Some(text),
            _ => None,
        }
    }

    fn is_punct(&self, c: char) -> bool {
        matches!(self, Token::Punct(p) if *p == c)
    }
}

const RESERVED: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS", "DELETE", "DESC", "DISTINCT",
    "ELSE", "END", "EXCEPT", "EXISTS", "FOR", "FROM", "FULL", "GROUP", "HAVING", "IN", "INNER",
    "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "LOCK", "NATURAL",
    "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "RECURSIVE", "REPLACE", "RETURNING",
    "RIGHT", "SELECT", "SET", "THEN", "UNION", "UPDATE", "USING", "VALUES", "WHEN", "WHERE",
    "WINDOW", "WITH",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Keywords that stand for a value, not a column, when written bare.
const NILADIC: &[&str] = &[
    "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "CURRENT_USER", "FALSE", "LOCALTIME",
    "LOCALTIMESTAMP", "TRUE", "UNKNOWN", "UTC_DATE", "UTC_TIME", "UTC_TIMESTAMP",
];

fn is_niladic(token: &Token) -> bool {
    matches!(token, Token::Ident { text, quoted: false }
        if NILADIC.iter().any(|k| k.eq_ignore_ascii_case(text)))
}

static TOKEN_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r#"[A-Za-z_][A-Za-z0-9_$]*|`[^`]*`|"[^"]*"|'[^']*'|:[A-Za-z_][A-Za-z0-9_]*|\?|[0-9]+(?:\.[0-9]+)?|\S"#,
    )
});

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let masked = mask_literals(sql)?;
    let pattern = TOKEN_PATTERN.as_ref().map_err(|e| Error::Parse(e.clone()))?;
    let tokens = pattern
        .find_iter(&masked)
        .map(|m| {
            let s = m.as_str();
            match s.as_bytes()[0] {
                b'`' => Token::Ident {
                    text: s[1..s.len() - 1].to_owned(),
                    quoted: true,
                },
                c if is_ident_start(c) => Token::Ident {
                    text: s.to_owned(),
                    quoted: false,
                },
                // MySQL reads double quotes as strings
                b'\'' | b'"' | b':' | b'?' => Token::Literal,
                c if c.is_ascii_digit() => Token::Literal,
                _ => Token::Punct(s.chars().next().unwrap_or(' ')),
            }
        })
        .collect();
    Ok(tokens)
}

#[derive(Debug)]
struct TableRef {
    name: String,
    alias: Option<String>,
    /// Parenthesis depth, 0 for the outermost statement.
    depth: usize,
}

/// One pass over the tokens collecting table references, CTE names and
/// INSERT/SET target columns.
struct Walk<'t> {
    tokens: &'t [Token],
    refs: Vec<TableRef>,
    ctes: HashSet<String>,
    target_columns: Vec<(String, String)>,
}

impl<'t> Walk<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        let mut walk = Self {
            tokens,
            refs: Vec::new(),
            ctes: HashSet::new(),
            target_columns: Vec::new(),
        };
        walk.collect_ctes();
        walk.collect_refs();
        walk
    }

    fn get(&self, i: usize) -> Option<&'t Token> {
        self.tokens.get(i)
    }

    fn collect_ctes(&mut self) {
        let tokens = self.tokens;
        if !tokens.first().is_some_and(|t| t.is_keyword("WITH")) {
            return;
        }
        let mut depth = 0usize;
        for i in 1..tokens.len() {
            let token = &tokens[i];
            match token {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => depth = depth.saturating_sub(1),
                _ if depth == 0 && is_statement_start(token) => return,
                _ if depth == 0 => {
                    let prev = &tokens[i - 1];
                    let opens_cte = prev.is_keyword("WITH")
                        || prev.is_keyword("RECURSIVE")
                        || prev.is_punct(',');
                    if let (true, Some(name), Some(next)) = (opens_cte, token.name(), self.get(i + 1))
                    {
                        if next.is_keyword("AS") || next.is_punct('(') {
                            self.ctes.insert(name.to_ascii_lowercase());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_refs(&mut self) {
        // true for parentheses opened by a function call
        let mut parens: Vec<bool> = Vec::new();
        let tokens = self.tokens;
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            let prev = i.checked_sub(1).and_then(|p| self.get(p));
            let in_function = parens.last().copied().unwrap_or(false);
            match token {
                Token::Punct('(') => {
                    let subquery = self
                        .get(i + 1)
                        .is_some_and(|t| t.is_keyword("SELECT") || t.is_keyword("WITH"));
                    parens.push(!subquery && prev.is_some_and(|p| p.name().is_some()));
                }
                Token::Punct(')') => {
                    parens.pop();
                }
                _ if in_function => {}
                _ if token.is_keyword("FROM") => {
                    i = self.table_list(i + 1, parens.len(), true);
                    continue;
                }
                _ if token.is_keyword("JOIN") => {
                    i = self.table_list(i + 1, parens.len(), false);
                    continue;
                }
                _ if token.is_keyword("INTO") => {
                    let start = self.refs.len();
                    i = self.table_list(i + 1, parens.len(), false);
                    if let Some(table) = self.refs.get(start).map(|r| r.name.clone()) {
                        i = self.column_list(i, &table);
                    }
                    continue;
                }
                _ if token.is_keyword("UPDATE")
                    && !prev.is_some_and(|p| p.is_keyword("KEY") || p.is_keyword("FOR")) =>
                {
                    let mut j = i + 1;
                    if self.get(j).is_some_and(|t| t.is_keyword("OR")) {
                        j += 2;
                    }
                    let start = self.refs.len();
                    i = self.table_list(j, parens.len(), false);
                    if let Some(table) = self.refs.get(start).map(|r| r.name.clone()) {
                        self.set_columns(i, &table);
                    }
                    continue;
                }
                _ => {}
            }
            i += 1;
        }
    }

    /// Reads `table [AS alias] [, table [AS alias]]*` starting at `i`.
    fn table_list(&mut self, mut i: usize, depth: usize, allow_comma: bool) -> usize {
        loop {
            let Some(mut name) = self.get(i).and_then(Token::name) else {
                return i;
            };
            i += 1;
            // schema-qualified: keep the table part
            while self.get(i).is_some_and(|t| t.is_punct('.')) {
                match self.get(i + 1).and_then(Token::ident) {
                    Some(part) => {
                        name = part;
                        i += 2;
                    }
                    None => break,
                }
            }
            let mut alias = None;
            if self.get(i).is_some_and(|t| t.is_keyword("AS")) {
                alias = self.get(i + 1).and_then(Token::name);
                i += 2;
            } else if let Some(a) = self.get(i).and_then(Token::name) {
                alias = Some(a);
                i += 1;
            }
            self.refs.push(TableRef {
                name: name.to_owned(),
                alias: alias.map(str::to_owned),
                depth,
            });
            if allow_comma && self.get(i).is_some_and(|t| t.is_punct(',')) {
                i += 1;
                continue;
            }
            return i;
        }
    }

    /// Reads `(col, col, ...)` after an INSERT target.
    fn column_list(&mut self, mut i: usize, table: &str) -> usize {
        if !self.get(i).is_some_and(|t| t.is_punct('(')) {
            return i;
        }
        i += 1;
        while let Some(token) = self.get(i) {
            match token {
                Token::Punct(')') => return i + 1,
                Token::Punct(',') => {}
                other => match other.name() {
                    Some(column) => self
                        .target_columns
                        .push((table.to_owned(), column.to_owned())),
                    // INSERT ... SELECT or something we do not understand
                    None => return i,
                },
            }
            i += 1;
        }
        i
    }

    /// Reads `SET col = ..., col = ...` after an UPDATE target.
    fn set_columns(&mut self, i: usize, table: &str) {
        if !self.get(i).is_some_and(|t| t.is_keyword("SET")) {
            return;
        }
        let mut depth = 0usize;
        let mut expect_column = true;
        for (j, token) in self.tokens.iter().enumerate().skip(i + 1) {
            match token {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => depth = depth.saturating_sub(1),
                Token::Punct(',') if depth == 0 => {
                    expect_column = true;
                    continue;
                }
                _ if depth == 0 && token.is_keyword("WHERE") => return,
                _ => {}
            }
            if expect_column && depth == 0 {
                expect_column = false;
                if let (Some(column), Some(eq)) = (token.name(), self.get(j + 1)) {
                    if eq.is_punct('=') {
                        self.target_columns
                            .push((table.to_owned(), column.to_owned()));
                    }
                }
            }
        }
    }

    /// Token slices of the outermost select list, split on top-level commas.
    fn select_items(&self) -> Option<Vec<&'t [Token]>> {
        let mut depth = 0usize;
        let mut start = None;
        for (i, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => depth = depth.saturating_sub(1),
                _ if depth == 0 && token.is_keyword("SELECT") => {
                    start = Some(i + 1);
                    break;
                }
                _ => {}
            }
        }
        let mut i = start?;
        while self
            .get(i)
            .is_some_and(|t| t.is_keyword("DISTINCT") || t.is_keyword("ALL"))
        {
            i += 1;
        }

        let mut items = Vec::new();
        let mut item_start = i;
        let mut depth = 0usize;
        while i < self.tokens.len() {
            let token = &self.tokens[i];
            match token {
                Token::Punct('(') => depth += 1,
                Token::Punct(')') => depth = depth.saturating_sub(1),
                Token::Punct(',') if depth == 0 => {
                    items.push(&self.tokens[item_start..i]);
                    item_start = i + 1;
                }
                _ if depth == 0 && (token.is_keyword("FROM") || is_select_terminator(token)) => {
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        items.push(&self.tokens[item_start..i]);
        Some(items)
    }
}

fn is_statement_start(token: &Token) -> bool {
    ["SELECT", "INSERT", "REPLACE", "UPDATE", "DELETE"]
        .iter()
        .any(|k| token.is_keyword(k))
}

fn is_select_terminator(token: &Token) -> bool {
    ["WHERE", "GROUP", "ORDER", "LIMIT", "UNION", "HAVING", "EXCEPT", "INTERSECT"]
        .iter()
        .any(|k| token.is_keyword(k))
}

enum SelectItem<'t> {
    Star,
    QualifiedStar(&'t str),
    Column(&'t str),
    QualifiedColumn(&'t str, &'t str),
    Aliased(&'t str),
    Opaque,
}

impl<'t> SelectItem<'t> {
    fn classify(item: &'t [Token]) -> Self {
        match item {
            [Token::Punct('*')] => SelectItem::Star,
            [q, Token::Punct('.'), Token::Punct('*')] => {
                q.ident().map_or(SelectItem::Opaque, SelectItem::QualifiedStar)
            }
            [c] if is_niladic(c) => SelectItem::Opaque,
            [c] => c.name().map_or(SelectItem::Opaque, SelectItem::Column),
            [q, Token::Punct('.'), c] => match (q.ident(), c.ident()) {
                (Some(q), Some(c)) => SelectItem::QualifiedColumn(q, c),
                _ => SelectItem::Opaque,
            },
            [.., as_kw, alias] if as_kw.is_keyword("AS") => {
                alias.name().map_or(SelectItem::Opaque, SelectItem::Aliased)
            }
            [.., prev, alias]
                if !prev.is_punct('.')
                    && (prev.name().is_some()
                        || prev.is_punct(')')
                        || *prev == Token::Literal) =>
            {
                alias.name().map_or(SelectItem::Opaque, SelectItem::Aliased)
            }
            _ => SelectItem::Opaque,
        }
    }
}
