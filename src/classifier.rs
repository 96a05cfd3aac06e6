use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static LEADING_KEYWORD: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(?:\s+|--[^\n]*(?:\n|$)|/\*(?s:.*?)\*/|\()*([A-Za-z]+)"));

/// Kind of statement a query method runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Read,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub fn is_read(self) -> bool {
        matches!(self, StatementKind::Read)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Read => "SELECT",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Classifies a statement by its leading keyword.
///
/// Leading whitespace, comments and opening parentheses are skipped and the
/// keyword is compared case-insensitively. `WITH` is treated as a read,
/// `REPLACE` as an insert.
///
/// # Examples
///
/// ```
/// use sqlx_named_query::classifier::{classify, StatementKind};
///
/// assert_eq!(classify("  select * from song")?, StatementKind::Read);
/// assert_eq!(classify("DELETE FROM song WHERE id = :id")?, StatementKind::Delete);
/// # Ok::<(), sqlx_named_query::Error>(())
/// ```
pub fn classify(sql: &str) -> Result<StatementKind> {
    let leading = LEADING_KEYWORD.as_ref().map_err(|e| Error::Parse(e.clone()))?;
    let keyword = leading
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| Error::UnsupportedStatementKind(leading_token(sql)))?;

    match keyword.to_ascii_uppercase().as_str() {
        "SELECT" | "WITH" => Ok(StatementKind::Read),
        "INSERT" | "REPLACE" => Ok(StatementKind::Insert),
        "UPDATE" => Ok(StatementKind::Update),
        "DELETE" => Ok(StatementKind::Delete),
        other => Err(Error::UnsupportedStatementKind(other.to_owned())),
    }
}

fn leading_token(sql: &str) -> String {
    sql.split_whitespace().next().unwrap_or_default().to_owned()
}
