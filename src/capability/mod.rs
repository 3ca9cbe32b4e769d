//! Read-Only Guard for Ad-hoc Queries
//!
//! The `query` command runs caller-supplied SQL through the row streaming
//! executor. Before anything is sent, the statement is reduced to its
//! leading keyword and checked against a per-provider allow list. Writes,
//! DDL and multi-statement batches are rejected.
//!
//! # Validation Strategy
//! - Comments and string literals are blanked before any keyword is read,
//!   so `'; DROP TABLE x'` inside a literal never counts as a second
//!   statement
//! - `EXPLAIN` is unwrapped and the explained statement checked in turn
//! - A `WITH` whose body contains a data-modifying keyword is rejected
//! - Anything not recognised is rejected

use crate::engine::Provider;
use crate::error::{DbDriveError, Result};

/// Keywords that make a `WITH` statement data-modifying
const DML_KEYWORDS: [&str; 5] = ["INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE"];

/// Check that `sql` is a single read-only statement for `provider`
pub fn validate_query(sql: &str, provider: Provider) -> Result<()> {
    let normalized = preprocess_sql(sql)?;

    if is_read_only(&normalized, provider) {
        tracing::trace!(%provider, "query passed read-only guard");
        Ok(())
    } else {
        Err(DbDriveError::capability_violation(format!(
            "dbdrive only runs read-only statements on {provider}; rejected: {}",
            sql.trim()
        )))
    }
}

/// Blank comments and literals, reject batches, upper-case the rest
fn preprocess_sql(sql: &str) -> Result<String> {
    let blanked = blank_comments_and_literals(sql.trim());
    let body = blanked.trim().trim_end_matches(';').trim_end();

    if body.is_empty() {
        return Err(DbDriveError::invalid_input("Query cannot be empty"));
    }
    if body.contains(';') {
        return Err(DbDriveError::invalid_input("Multi-statement queries are not supported"));
    }

    Ok(body.to_ascii_uppercase())
}

/// Replace comments with a space and the contents of quoted text with nothing
///
/// Quote characters themselves are kept so identifiers stay separated.
fn blank_comments_and_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
                out.push(' ');
            }
            '\'' | '"' | '`' => {
                out.push(ch);
                // doubled quote is an escaped quote and keeps the literal open
                while let Some(c) = chars.next() {
                    if c == ch {
                        if chars.peek() == Some(&ch) {
                            chars.next();
                            continue;
                        }
                        out.push(ch);
                        break;
                    }
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

fn words(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_')).filter(|w| !w.is_empty())
}

fn leading_keyword(sql: &str) -> &str {
    words(sql).next().unwrap_or_default()
}

/// Split off `EXPLAIN` and its options, returning whether one was present
fn strip_explain(sql: &str) -> (bool, &str) {
    let trimmed = sql.trim_start();
    let Some(rest) = trimmed.strip_prefix("EXPLAIN") else {
        return (false, trimmed);
    };
    let mut rest = rest.trim_start();

    // EXPLAIN (ANALYZE, FORMAT JSON) ...
    if let Some(options) = rest.strip_prefix('(') {
        rest = options.split_once(')').map_or("", |(_, tail)| tail).trim_start();
    }
    for option in ["ANALYZE", "VERBOSE", "QUERY PLAN"] {
        if let Some(tail) = rest.strip_prefix(option) {
            rest = tail.trim_start();
        }
    }
    (true, rest)
}

fn is_read_only(sql: &str, provider: Provider) -> bool {
    match provider {
        Provider::Oracle => is_read_only_oracle(sql),
        Provider::Postgres => is_read_only_postgres(sql),
        Provider::Sqlite => is_read_only_sqlite(sql),
    }
}

fn is_read_only_cte(sql: &str) -> bool {
    !words(sql).any(|w| DML_KEYWORDS.contains(&w))
}

fn is_read_only_oracle(sql: &str) -> bool {
    match leading_keyword(sql) {
        "SELECT" => true,
        "WITH" => is_read_only_cte(sql),
        _ => false,
    }
}

fn is_read_only_postgres(sql: &str) -> bool {
    let (explained, statement) = strip_explain(sql);

    match leading_keyword(statement) {
        "SELECT" | "VALUES" | "TABLE" => true,
        "SHOW" => !explained,
        "WITH" => is_read_only_cte(statement),
        _ => false,
    }
}

fn is_read_only_sqlite(sql: &str) -> bool {
    let (_, statement) = strip_explain(sql);

    match leading_keyword(statement) {
        "SELECT" | "VALUES" => true,
        "WITH" => is_read_only_cte(statement),
        // PRAGMA name = value writes a setting
        "PRAGMA" => !statement.contains('='),
        _ => false,
    }
}
