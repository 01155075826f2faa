//! Statement analysis for raw SQL change scripts
//!
//! Classifies a script before execution: how many statements it holds,
//! whether it already opens its own transaction, and whether it produces
//! rows worth capturing. Comments never influence classification.
//!
//! The lexer understands the Postgres quoting forms that can hide a `;`
//! or a comment marker: `'…'` literals, `"…"` identifiers, and dollar
//! quoting (`$$…$$`, `$tag$…$tag$`). A terminator inside any of them does
//! not end a statement.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static WRAP_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(BEGIN|START\s+TRANSACTION)\b").unwrap());
static WRAP_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCOMMIT\s*;?\s*$").unwrap());
static RETURNING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bRETURNING\b").unwrap());
static SELECT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^SELECT\b").unwrap());

/// Derived classification of one script. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementAnalysis {
    /// Number of `;` terminators outside comments and quoted text.
    pub statement_count: usize,
    pub is_already_wrapped: bool,
    pub has_returning_clause: bool,
    pub is_select_only: bool,
    pub should_capture_rows: bool,
}

/// Classify a raw script.
pub fn analyze(sql: &str) -> StatementAnalysis {
    let stripped = strip_comments(sql);
    let trimmed = stripped.trim();

    let statement_count = tokenize(&stripped)
        .into_iter()
        .filter(|(span, _)| *span == Span::Code)
        .map(|(_, range)| stripped[range].matches(';').count())
        .sum();

    let is_already_wrapped = WRAP_START.is_match(trimmed) && WRAP_END.is_match(trimmed);
    let has_returning_clause = RETURNING.is_match(&stripped);
    let is_select_only = SELECT_START.is_match(trimmed);

    StatementAnalysis {
        statement_count,
        is_already_wrapped,
        has_returning_clause,
        is_select_only,
        should_capture_rows: is_select_only || has_returning_clause,
    }
}

/// Remove `--` line comments and `/* */` block comments (non-nesting).
///
/// Block comments become a single space so `SELECT/**/1` stays two tokens.
/// Line comments keep their trailing newline.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    for (span, range) in tokenize(sql) {
        match span {
            Span::Code | Span::Quoted => out.push_str(&sql[range]),
            Span::BlockComment => out.push(' '),
            Span::LineComment => {}
        }
    }
    out
}

/// Split a script into its statements in source order, comments removed,
/// terminators dropped, empty segments skipped.
pub fn split_statements(sql: &str) -> Vec<String> {
    let stripped = strip_comments(sql);
    let mut statements = Vec::new();
    let mut current = String::new();

    for (span, range) in tokenize(&stripped) {
        let text = &stripped[range];
        if span != Span::Code {
            current.push_str(text);
            continue;
        }
        let mut rest = text;
        while let Some(pos) = rest.find(';') {
            current.push_str(&rest[..pos]);
            flush_statement(&mut statements, &mut current);
            rest = &rest[pos + 1..];
        }
        current.push_str(rest);
    }
    flush_statement(&mut statements, &mut current);
    statements
}

fn flush_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

// ── Lexer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Span {
    Code,
    Quoted,
    LineComment,
    BlockComment,
}

/// Partition `sql` into contiguous spans. Every byte belongs to exactly one
/// span. All delimiters are ASCII so byte offsets are valid char boundaries.
fn tokenize(sql: &str) -> Vec<(Span, Range<usize>)> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut spans = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < len {
        let (span, end) = match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = sql[i..].find('\n').map_or(len, |p| i + p);
                (Span::LineComment, end)
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = sql[i + 2..].find("*/").map_or(len, |p| i + 2 + p + 2);
                (Span::BlockComment, end)
            }
            quote @ (b'\'' | b'"') => (Span::Quoted, quoted_end(bytes, i, quote)),
            b'$' => match dollar_tag_len(bytes, i) {
                Some(tag_len) => {
                    let tag = &sql[i..i + tag_len];
                    let body = i + tag_len;
                    let end = sql[body..]
                        .find(tag)
                        .map_or(len, |p| body + p + tag_len);
                    (Span::Quoted, end)
                }
                None => {
                    i += 1;
                    continue;
                }
            },
            _ => {
                i += 1;
                continue;
            }
        };

        if code_start < i {
            spans.push((Span::Code, code_start..i));
        }
        spans.push((span, i..end));
        i = end;
        code_start = end;
    }

    if code_start < len {
        spans.push((Span::Code, code_start..len));
    }
    spans
}

/// End offset (exclusive) of a quoted run starting at `start`. A doubled
/// quote character is an escape. Unterminated runs extend to end of input.
fn quoted_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut j = start + 1;
    while j < bytes.len() {
        if bytes[j] == quote {
            if bytes.get(j + 1) == Some(&quote) {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    bytes.len()
}

/// Length of a dollar-quote opener (`$$` or `$tag$`) at `start`, if any.
/// `$1` positional parameters and identifiers containing `$` are not openers.
fn dollar_tag_len(bytes: &[u8], start: usize) -> Option<usize> {
    if start > 0 && is_ident_byte(bytes[start - 1]) {
        return None;
    }
    let mut j = start + 1;
    while j < bytes.len() && is_ident_byte(bytes[j]) {
        if j == start + 1 && bytes[j].is_ascii_digit() {
            return None;
        }
        j += 1;
    }
    (bytes.get(j) == Some(&b'$')).then_some(j - start + 1)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_terminator_counts_two_statements() {
        let a = analyze("SELECT * FROM t;;");
        assert_eq!(a.statement_count, 2);
        assert!(a.is_select_only);
        assert!(a.should_capture_rows);
    }

    #[test]
    fn two_statements_on_two_lines() {
        let a = analyze("SELECT 1;\nSELECT 2;");
        assert_eq!(a.statement_count, 2);
        assert!(!a.is_already_wrapped);
    }

    #[test]
    fn explicit_transaction_is_detected() {
        let a = analyze("BEGIN; UPDATE t SET x=1; COMMIT;");
        assert_eq!(a.statement_count, 3);
        assert!(a.is_already_wrapped);
    }

    #[test]
    fn start_transaction_lowercase_is_detected() {
        let a = analyze("start transaction;\nupdate t set x = 1;\ncommit");
        assert!(a.is_already_wrapped);
    }

    #[test]
    fn begin_without_commit_is_not_wrapped() {
        let a = analyze("BEGIN; UPDATE t SET x=1;");
        assert!(!a.is_already_wrapped);
    }

    #[test]
    fn beginning_identifier_is_not_a_transaction_start() {
        let a = analyze("beginning_balance_update(); COMMIT;");
        assert!(!a.is_already_wrapped);
    }

    #[test]
    fn returning_clause_write() {
        let a = analyze("UPDATE t SET x=1 RETURNING id;");
        assert!(a.has_returning_clause);
        assert!(a.should_capture_rows);
        assert!(!a.is_select_only);
        assert_eq!(a.statement_count, 1);
    }

    #[test]
    fn returning_in_line_comment_is_ignored() {
        let a = analyze("UPDATE t SET x=1; -- RETURNING id\n");
        assert!(!a.has_returning_clause);
        assert!(!a.should_capture_rows);
    }

    #[test]
    fn returning_in_block_comment_is_ignored() {
        let a = analyze("DELETE FROM t /* returning * */;");
        assert!(!a.has_returning_clause);
    }

    #[test]
    fn returning_is_case_insensitive() {
        assert!(analyze("insert into t values (1) returning *;").has_returning_clause);
    }

    #[test]
    fn commented_out_statements_do_not_count() {
        let sql = "-- DROP TABLE users;\n/* DELETE FROM t; DELETE FROM u; */\nUPDATE t SET x = 1;";
        assert_eq!(analyze(sql).statement_count, 1);
    }

    #[test]
    fn leading_comment_does_not_hide_select() {
        let a = analyze("-- Author: dana\n-- Purpose: report\nSELECT count(*) FROM orders;");
        assert!(a.is_select_only);
    }

    #[test]
    fn plain_write_does_not_capture() {
        let a = analyze("INSERT INTO t (x) VALUES (1);");
        assert!(!a.should_capture_rows);
    }

    #[test]
    fn terminator_inside_literal_is_not_counted() {
        let a = analyze("INSERT INTO t (s) VALUES ('a;b');");
        assert_eq!(a.statement_count, 1);
    }

    #[test]
    fn comment_marker_inside_literal_is_kept() {
        let stripped = strip_comments("SELECT '--not a comment' AS s;");
        assert_eq!(stripped, "SELECT '--not a comment' AS s;");
    }

    #[test]
    fn strip_comments_replaces_block_with_space() {
        assert_eq!(strip_comments("SELECT/**/1"), "SELECT 1");
        assert_eq!(strip_comments("SELECT 1; -- tail\nSELECT 2;"), "SELECT 1; \nSELECT 2;");
    }

    #[test]
    fn unterminated_block_comment_runs_to_end() {
        assert_eq!(strip_comments("SELECT 1; /* never closed;"), "SELECT 1;  ");
    }

    #[test]
    fn dollar_quoted_body_is_one_statement() {
        let sql = "CREATE FUNCTION f() RETURNS int AS $$ BEGIN RETURN 1; END; $$ LANGUAGE plpgsql;";
        let a = analyze(sql);
        assert_eq!(a.statement_count, 1);
        assert_eq!(split_statements(sql).len(), 1);
    }

    #[test]
    fn tagged_dollar_quote() {
        let sql = "DO $body$ BEGIN PERFORM 1; END $body$;\nSELECT 2;";
        assert_eq!(
            split_statements(sql),
            vec!["DO $body$ BEGIN PERFORM 1; END $body$", "SELECT 2"]
        );
    }

    #[test]
    fn positional_parameter_is_not_a_dollar_quote() {
        let sql = "PREPARE p AS SELECT $1; EXECUTE p(1);";
        assert_eq!(split_statements(sql).len(), 2);
    }

    #[test]
    fn split_drops_empty_segments() {
        assert_eq!(split_statements("SELECT * FROM t;;"), vec!["SELECT * FROM t"]);
        assert_eq!(
            split_statements("SELECT 1;\n-- note\nSELECT 2;"),
            vec!["SELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn split_keeps_unterminated_tail() {
        assert_eq!(split_statements("SELECT 1; SELECT 2"), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn comment_only_script_has_no_statements() {
        assert!(split_statements("-- nothing here\n/* or here */").is_empty());
        assert_eq!(analyze("-- ;;;").statement_count, 0);
    }

    #[test]
    fn escaped_quote_inside_literal() {
        let sql = "INSERT INTO t VALUES ('it''s; fine'); SELECT 1;";
        assert_eq!(split_statements(sql).len(), 2);
    }
}
