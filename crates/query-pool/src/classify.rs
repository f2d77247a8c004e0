//! Deciding whether a statement returns rows.
//!
//! Workers need to know up front whether to call `execute_query` (and hand
//! a cursor back) or `execute`. Callers can say so explicitly with
//! [`StatementKind`]; otherwise the pool's [`DispatchPolicy`] decides from
//! the SQL text.

/// Whether a statement is executed as a query or as a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Row-returning; the future resolves to a cursor.
    Query,
    /// No rows; the future resolves to `Executed`.
    Execute,
}

impl StatementKind {
    /// Check if this kind produces a cursor.
    #[must_use]
    pub fn returns_rows(self) -> bool {
        matches!(self, Self::Query)
    }
}

/// Policy used to pick a [`StatementKind`] from SQL text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Look at the first keyword after whitespace, comments and opening
    /// parentheses, case-insensitively. A `WITH` statement is judged by the
    /// statement following its common table expressions.
    #[default]
    Classify,
    /// Row-returning only when the text starts with the literal bytes
    /// `SELECT`. Kept for callers that depend on the exact legacy behavior.
    SelectPrefix,
}

impl DispatchPolicy {
    /// Pick the statement kind for `sql`.
    #[must_use]
    pub fn kind_of(self, sql: &str) -> StatementKind {
        let returns_rows = match self {
            Self::Classify => statement_keyword(sql).is_some_and(is_row_returning_keyword),
            Self::SelectPrefix => sql.starts_with("SELECT"),
        };
        if returns_rows {
            StatementKind::Query
        } else {
            StatementKind::Execute
        }
    }
}

/// Keywords that start a row-returning statement.
const ROW_RETURNING_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "VALUES", "TABLE",
];

fn is_row_returning_keyword(keyword: &str) -> bool {
    ROW_RETURNING_KEYWORDS
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(keyword))
}

/// Return the first keyword of `sql`.
///
/// Skips whitespace, `-- ...` and `# ...` line comments, `/* ... */` block
/// comments and opening parentheses. Returns `None` if nothing but those
/// remain.
#[must_use]
pub fn leading_keyword(sql: &str) -> Option<&str> {
    let word = word_at(sql, skip_trivia(sql, 0, true));
    (!word.is_empty()).then_some(word)
}

/// Return the keyword of the statement `sql` actually runs.
///
/// Same as [`leading_keyword`], except that for `WITH` the common table
/// expressions are skipped and the main statement's keyword is returned
/// (`WITH c AS (...) DELETE ...` gives `DELETE`). Falls back to `WITH` when
/// no main statement can be found.
#[must_use]
pub fn statement_keyword(sql: &str) -> Option<&str> {
    let start = skip_trivia(sql, 0, true);
    let keyword = word_at(sql, start);
    if keyword.is_empty() {
        return None;
    }
    if keyword.eq_ignore_ascii_case("WITH") {
        return keyword_after_ctes(sql, start + keyword.len()).or(Some(keyword));
    }
    Some(keyword)
}

/// Find the first top-level word after a closed parenthesized group that is
/// not `AS`. Quoted text and comments are skipped.
fn keyword_after_ctes(sql: &str, from: usize) -> Option<&str> {
    let bytes = sql.as_bytes();
    let mut i = from;
    let mut depth = 0_usize;
    let mut after_group = false;

    loop {
        i = skip_trivia(sql, i, false);
        let &b = bytes.get(i)?;
        match b {
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                i += 1;
                after_group = depth == 0;
                continue;
            }
            b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i),
            b if b.is_ascii_alphanumeric() || b == b'_' => {
                let word = word_at(sql, i);
                if depth == 0 && after_group && !word.eq_ignore_ascii_case("AS") {
                    return Some(word);
                }
                i += word.len();
            }
            _ => i += 1,
        }
        after_group = false;
    }
}

fn skip_trivia(sql: &str, mut i: usize, skip_parens: bool) -> usize {
    let bytes = sql.as_bytes();
    let len = bytes.len();

    while i < len {
        match bytes[i] {
            b'(' if skip_parens => i += 1,
            b if b.is_ascii_whitespace() => i += 1,
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_line(bytes, i + 2);
            }
            b'#' => i = skip_line(bytes, i + 1),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = match sql[i + 2..].find("*/") {
                    Some(end) => i + 2 + end + 2,
                    None => len,
                };
            }
            _ => break,
        }
    }
    i
}

fn word_at(sql: &str, i: usize) -> &str {
    let rest = &sql[i..];
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    &rest[..end]
}

fn skip_line(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |pos| from + pos + 1)
}

/// Index just past the closing quote of the literal starting at `start`.
fn skip_quoted(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if quote != b'`' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}
