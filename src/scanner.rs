//! Bind marker scanning.
//!
//! The scanner walks the raw SQL once, skipping quoted literals, quoted
//! identifiers and comments, and yields every `:name` placeholder and every
//! positional `?` in source order.

use crate::error::{Error, Result};

/// Raw SQL of a query method, tagged with the method it belongs to.
///
/// Never rewritten in place: expansions produce a new string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryText {
    method: String,
    sql: String,
}

impl QueryText {
    /// Wraps `sql` for `method`. Empty or blank SQL is rejected.
    pub fn new(method: impl Into<String>, sql: impl Into<String>) -> Result<Self> {
        let method = method.into();
        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(Error::EmptyQuery(method));
        }
        Ok(Self { method, sql })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn as_str(&self) -> &str {
        &self.sql
    }

    /// Starts a fresh scan. Every call restarts from the beginning.
    pub fn scan(&self) -> Scanner<'_> {
        Scanner::new(&self.sql)
    }

    /// Scans the whole text, stopping at the first malformed marker.
    pub fn markers(&self) -> Result<Vec<BindMarker>> {
        self.scan().collect()
    }
}

/// A named bind marker, `:name`, found at byte `offset` (the colon).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub offset: usize,
}

impl Placeholder {
    /// Byte offset just past the placeholder.
    pub fn end(&self) -> usize {
        self.offset + 1 + self.name.len()
    }
}

/// Any bind marker the engine will see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindMarker {
    Named(Placeholder),
    /// A `?` written directly in the SQL. Passed through untouched.
    Positional { offset: usize },
}

impl BindMarker {
    pub fn offset(&self) -> usize {
        match self {
            BindMarker::Named(p) => p.offset,
            BindMarker::Positional { offset } => *offset,
        }
    }

    pub fn end(&self) -> usize {
        match self {
            BindMarker::Named(p) => p.end(),
            BindMarker::Positional { offset } => offset + 1,
        }
    }

    pub fn as_named(&self) -> Option<&Placeholder> {
        match self {
            BindMarker::Named(p) => Some(p),
            BindMarker::Positional { .. } => None,
        }
    }
}

/// Lazy iterator over the bind markers of a SQL string.
///
/// Yields at most one error, after which it is exhausted.
pub struct Scanner<'a> {
    sql: &'a str,
    pos: usize,
    failed: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self {
            sql,
            pos: 0,
            failed: false,
        }
    }

    fn fail(&mut self, offset: usize, reason: impl Into<String>) -> Option<Result<BindMarker>> {
        self.failed = true;
        Some(Err(Error::MalformedQuery {
            offset,
            reason: reason.into(),
        }))
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<BindMarker>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let bytes = self.sql.as_bytes();
        while self.pos < bytes.len() {
            let start = self.pos;
            match bytes[start] {
                quote @ (b'\'' | b'"' | b'`') => match skip_quoted(bytes, start, quote) {
                    Some(end) => self.pos = end,
                    None => return self.fail(start, "unterminated quoted literal"),
                },
                b'-' if bytes.get(start + 1) == Some(&b'-') => {
                    self.pos = skip_line_comment(bytes, start);
                }
                b'/' if bytes.get(start + 1) == Some(&b'*') => {
                    self.pos = skip_block_comment(bytes, start);
                }
                b'?' => {
                    self.pos = start + 1;
                    return Some(Ok(BindMarker::Positional { offset: start }));
                }
                b':' => match bytes.get(start + 1) {
                    // `::` casts and `:=` assignments are operators, not binds
                    Some(b':') | Some(b'=') => self.pos = start + 2,
                    Some(&c) if is_ident_start(c) => {
                        let mut end = start + 2;
                        while end < bytes.len() && is_ident_continue(bytes[end]) {
                            end += 1;
                        }
                        self.pos = end;
                        return Some(Ok(BindMarker::Named(Placeholder {
                            name: self.sql[start + 1..end].to_owned(),
                            offset: start,
                        })));
                    }
                    Some(&c) if c.is_ascii_digit() => {
                        return self.fail(start, "bind parameter name must not start with a digit")
                    }
                    _ => return self.fail(start, "expected a parameter name after ':'"),
                },
                _ => self.pos = start + 1,
            }
        }
        None
    }
}

/// Copy of `sql` with the contents of string literals and comments blanked out.
///
/// Byte offsets are preserved, quote characters of string literals (`'...'`,
/// `"..."`) are kept and quoted identifiers (`` `...` ``) are left intact.
pub fn mask_literals(sql: &str) -> Result<String> {
    let bytes = sql.as_bytes();
    let mut masked = bytes.to_vec();
    let mut pos = 0;
    while pos < bytes.len() {
        let start = pos;
        let (end, keep_delimiters) = match bytes[start] {
            quote @ (b'\'' | b'"' | b'`') => {
                let end = skip_quoted(bytes, start, quote).ok_or_else(|| {
                    Error::MalformedQuery {
                        offset: start,
                        reason: "unterminated quoted literal".into(),
                    }
                })?;
                if quote == b'`' {
                    pos = end;
                    continue;
                }
                (end, true)
            }
            b'-' if bytes.get(start + 1) == Some(&b'-') => (skip_line_comment(bytes, start), false),
            b'/' if bytes.get(start + 1) == Some(&b'*') => (skip_block_comment(bytes, start), false),
            _ => {
                pos += 1;
                continue;
            }
        };
        let (from, to) = if keep_delimiters {
            (start + 1, end - 1)
        } else {
            (start, end)
        };
        for byte in &mut masked[from..to] {
            // keep line structure so offsets map to the same lines
            if *byte != b'\n' {
                *byte = b' ';
            }
        }
        pos = end;
    }
    // literal interiors are blanked whole, so no multi-byte sequence is split
    Ok(String::from_utf8_lossy(&masked).into_owned())
}

pub(crate) fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

pub(crate) fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Returns the offset just past the closing quote, or `None` if unterminated.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> Option<usize> {
    let mut pos = start + 1;
    while pos < bytes.len() {
        let c = bytes[pos];
        if c == b'\\' && quote != b'`' {
            pos += 2;
            continue;
        }
        if c == quote {
            // doubled quote is an escaped quote
            if bytes.get(pos + 1) == Some(&quote) {
                pos += 2;
                continue;
            }
            return Some(pos + 1);
        }
        pos += 1;
    }
    None
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&c| c == b'\n')
        .map_or(bytes.len(), |idx| start + idx + 1)
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    bytes[start + 2..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |idx| start + 2 + idx + 2)
}
