use crate::scanner::{BindMarker, Placeholder};

/// Converts named placeholders (`:name`) into positional placeholders (`?`).
///
/// `arity` tells how many `?` markers each named placeholder expands to: `1` for
/// a single value, the collection length for a collection argument. Expanded
/// markers are joined with `", "`. Positional markers already in the template are
/// copied as-is. Everything between markers is copied verbatim.
///
/// # Examples
///
/// ```
/// use sqlx_named_query::builder::build_query;
/// use sqlx_named_query::scanner::QueryText;
///
/// let text = QueryText::new("findByIds", "SELECT * FROM song WHERE id IN(:songIds)")?;
/// let markers = text.markers()?;
/// let sql = build_query(text.as_str(), &markers, |_| 3);
/// assert_eq!(sql, "SELECT * FROM song WHERE id IN(?, ?, ?)");
/// # Ok::<(), sqlx_named_query::Error>(())
/// ```
pub fn build_query<F>(template: &str, markers: &[BindMarker], mut arity: F) -> String
where
    F: FnMut(&Placeholder) -> usize,
{
    let mut sql = String::with_capacity(template.len() + markers.len() * 3);
    let mut cursor = 0;
    for marker in markers {
        sql.push_str(&template[cursor..marker.offset()]);
        match marker {
            BindMarker::Named(placeholder) => push_markers(&mut sql, arity(placeholder)),
            BindMarker::Positional { .. } => sql.push('?'),
        }
        cursor = marker.end();
    }
    sql.push_str(&template[cursor..]);
    sql
}

fn push_markers(sql: &mut String, count: usize) {
    for i in 0..count {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('?');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn build(template: &str, arity: usize) -> String {
        let markers: Vec<_> = Scanner::new(template).map(|m| m.unwrap()).collect();
        build_query(template, &markers, |_| arity)
    }

    #[test]
    fn test_build_query_single_param() {
        assert_eq!(
            build("SELECT * FROM song WHERE release_year = :year", 1),
            "SELECT * FROM song WHERE release_year = ?"
        );
    }

    #[test]
    fn test_build_query_multiple_params() {
        assert_eq!(
            build("SELECT * FROM users WHERE id = :id AND name = :name", 1),
            "SELECT * FROM users WHERE id = ? AND name = ?"
        );
    }

    #[test]
    fn test_build_query_repeated_params() {
        assert_eq!(
            build("SELECT * FROM users WHERE id = :id OR user_id = :id", 1),
            "SELECT * FROM users WHERE id = ? OR user_id = ?"
        );
    }

    #[test]
    fn test_build_query_no_params() {
        assert_eq!(build("SELECT * FROM users", 1), "SELECT * FROM users");
    }

    #[test]
    fn test_build_query_expands_collection() {
        let template = "SELECT * FROM song WHERE id IN(:ids) AND year > :year";
        let markers: Vec<_> = Scanner::new(template).map(|m| m.unwrap()).collect();
        let sql = build_query(template, &markers, |p| if p.name == "ids" { 4 } else { 1 });
        assert_eq!(sql, "SELECT * FROM song WHERE id IN(?, ?, ?, ?) AND year > ?");
    }

    #[test]
    fn test_build_query_empty_collection() {
        assert_eq!(
            build("SELECT * FROM song WHERE id IN(:ids)", 0),
            "SELECT * FROM song WHERE id IN()"
        );
    }

    #[test]
    fn test_build_query_keeps_literals_and_positional() {
        assert_eq!(
            build("SELECT ':x' FROM t WHERE a = ? AND b = :b", 1),
            "SELECT ':x' FROM t WHERE a = ? AND b = ?"
        );
    }
}
