//! Pulling SQL out of model text and checking what kind of statement it is.

use std::sync::LazyLock;

use regex::Regex;

// A language tag is only recognised when the fence line ends right after it,
// so "```SELECT 1```" keeps its SELECT.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?(.*?)```").expect("valid fence pattern")
});

const READ_ONLY_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "VALUES"];

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fenced_content(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Returns the content of the first fenced code block in `text` on a single
/// line, or an empty string when there is none.
#[must_use]
pub fn extract_sql(text: &str) -> String {
    fenced_content(text)
        .map(collapse_whitespace)
        .unwrap_or_default()
}

/// The statement to run for a tool input: the fenced block's content if the
/// input has one, otherwise the input as given. Line breaks and spacing are
/// kept.
#[must_use]
pub fn normalize_query(input: &str) -> &str {
    fenced_content(input).map_or(input, str::trim)
}

/// Skips whitespace and `--` / `/* */` comments.
fn skip_trivia(mut sql: &str) -> &str {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, rest)| rest);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, rest)| rest);
        } else {
            return sql;
        }
    }
}

/// The first keyword of a statement, past comments and opening parentheses.
fn leading_keyword(sql: &str) -> String {
    let mut rest = skip_trivia(sql);
    while let Some(inner) = rest.strip_prefix('(') {
        rest = skip_trivia(inner);
    }

    rest.chars()
        .take_while(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Accepts a single read-only statement.
///
/// # Errors
///
/// Returns a description of why the statement was refused.
pub fn check_read_only(sql: &str) -> Result<(), String> {
    if skip_trivia(sql).trim_start_matches(';').trim().is_empty() {
        return Err("no SQL statement was provided".to_string());
    }

    if has_statement_separator(sql) {
        return Err("only a single statement may be executed".to_string());
    }

    let keyword = leading_keyword(sql);

    if READ_ONLY_KEYWORDS.contains(&keyword.as_str()) {
        Ok(())
    } else {
        Err(format!(
            "only read-only SELECT statements are allowed, got {}",
            if keyword.is_empty() {
                "an unrecognised statement"
            } else {
                keyword.as_str()
            }
        ))
    }
}

/// True when a `;` outside quotes and comments is followed by another statement.
fn has_statement_separator(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(open), _) if c == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '-') if chars.peek().is_some_and(|&(_, next)| next == '-') => {
                match sql[i..].find('\n') {
                    Some(end) => while chars.next_if(|&(j, _)| j < i + end).is_some() {},
                    None => return false,
                }
            }
            (None, '/') if chars.peek().is_some_and(|&(_, next)| next == '*') => {
                match sql[i + 2..].find("*/") {
                    Some(end) => {
                        let close = i + 2 + end + 2;
                        while chars.next_if(|&(j, _)| j < close).is_some() {}
                    }
                    None => return false,
                }
            }
            (None, ';') => {
                let rest = skip_trivia(&sql[i + 1..]);
                if !rest.is_empty() && !rest.starts_with(';') {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_block() {
        let text = "Here you go:\n```sql\nSELECT *\n  FROM transactions\n WHERE status = 'approved'\n```\nDone.";
        assert_eq!(
            extract_sql(text),
            "SELECT * FROM transactions WHERE status = 'approved'"
        );
    }

    #[test]
    fn untagged_block() {
        assert_eq!(extract_sql("```\n  SELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn inline_block_keeps_first_word() {
        assert_eq!(
            extract_sql("```SELECT user_name FROM t```"),
            "SELECT user_name FROM t"
        );
    }

    #[test]
    fn no_block_is_empty() {
        assert_eq!(extract_sql("SELECT * FROM t"), "");
        assert_eq!(extract_sql("an unterminated ```sql\nSELECT 1"), "");
    }

    #[test]
    fn first_block_wins() {
        let text = "```sql\nSELECT 1\n```\nor\n```sql\nSELECT 2\n```";
        assert_eq!(extract_sql(text), "SELECT 1");
    }

    #[test]
    fn normalize_keeps_statement_text() {
        assert_eq!(normalize_query("```sql\nSELECT\n1\n```"), "SELECT\n1");
        assert_eq!(
            normalize_query("SELECT 1 -- one\nWHERE 'a  b' <> ''"),
            "SELECT 1 -- one\nWHERE 'a  b' <> ''"
        );
    }

    #[test]
    fn read_only_statements_pass() {
        assert!(check_read_only("SELECT * FROM t;").is_ok());
        assert!(check_read_only("  select count(*) from t").is_ok());
        assert!(check_read_only("WITH x AS (SELECT 1) SELECT * FROM x").is_ok());
        assert!(check_read_only("SELECT * FROM t WHERE name = 'a;b'").is_ok());
        assert!(check_read_only("/* approved */ SELECT COUNT(*) FROM t").is_ok());
        assert!(check_read_only("-- names\nSELECT user_name FROM t").is_ok());
        assert!(check_read_only("(SELECT 1 AS x)").is_ok());
        assert!(check_read_only("SELECT 1; -- done").is_ok());
        assert!(check_read_only("SELECT 1 -- don't; stop\nFROM t").is_ok());
    }

    #[test]
    fn writes_and_batches_are_refused() {
        let err = check_read_only("DELETE FROM t").unwrap_err();
        assert!(err.contains("DELETE"), "{err}");
        assert!(check_read_only("DROP TABLE t").is_err());
        assert!(check_read_only("SELECT 1; DROP TABLE t").is_err());
        assert!(check_read_only("").is_err());
        assert!(check_read_only(" ; ").is_err());
        assert!(check_read_only("-- nothing here").is_err());
        assert!(check_read_only("/* x */ DELETE FROM t").is_err());
        assert!(check_read_only("SELECT 1; /* then */ DROP TABLE t").is_err());
    }
}
