//! A quote/comment-aware SQL tokenizer, used by table-reference extraction,
//! read-only enforcement, and positional-row column reconstruction.
//!
//! Adapted from the same hand-rolled tokenizer a single-engine SQL tool uses
//! to extract table names for an allowlist check; here it backs the
//! executor's schema-grounding check across five engines instead of one.

use std::collections::BTreeSet;

/// One lexical unit of a SQL statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlToken<'a> {
    /// A bare identifier or keyword.
    Word(&'a str),
    /// A quoted identifier, including its delimiters (`"x"`, `` `x` ``, `[x]`).
    Quoted(&'a str),
    /// A single punctuation character: `.`, `,`, `(`, `)`, `;`.
    Punct(char),
}

/// Replace string literals and comments with spaces, preserving byte offsets
/// so downstream tokenizing never mistakes literal content for SQL syntax.
pub fn strip_sql_comments_and_strings(query: &str) -> String {
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                out.push(' ');
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\'' {
                        out.push(' ');
                        if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                            out.push(' ');
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                out.push(' ');
                out.push(' ');
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                out.push(' ');
                out.push(' ');
                i += 2;
                while i + 1 < bytes.len() {
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        out.push(' ');
                        out.push(' ');
                        i += 2;
                        break;
                    }
                    out.push(' ');
                    i += 1;
                }
            }
            _ => {
                let ch = query[i..].chars().next().unwrap_or('\0');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    out
}

/// Split a (comment/string-stripped) query into [`SqlToken`]s.
pub fn tokenize_sql(query: &str) -> Vec<SqlToken<'_>> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < query.len() {
        let ch = query[i..].chars().next().unwrap_or('\0');
        if ch.is_whitespace() {
            i += ch.len_utf8();
            continue;
        }
        match ch {
            '"' | '`' => {
                let close = ch;
                let start = i;
                i += 1;
                while i < query.len() {
                    let c = query[i..].chars().next().unwrap_or('\0');
                    i += c.len_utf8();
                    if c == close {
                        break;
                    }
                }
                tokens.push(SqlToken::Quoted(&query[start..i]));
            }
            '[' => {
                let start = i;
                i += 1;
                while i < query.len() {
                    let c = query[i..].chars().next().unwrap_or('\0');
                    i += c.len_utf8();
                    if c == ']' {
                        break;
                    }
                }
                tokens.push(SqlToken::Quoted(&query[start..i]));
            }
            '.' | ',' | '(' | ')' | ';' => {
                tokens.push(SqlToken::Punct(ch));
                i += ch.len_utf8();
            }
            _ if ch.is_alphabetic() || ch == '_' => {
                let start = i;
                i += ch.len_utf8();
                while i < query.len() {
                    let c = query[i..].chars().next().unwrap_or('\0');
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        i += c.len_utf8();
                    } else {
                        break;
                    }
                }
                tokens.push(SqlToken::Word(&query[start..i]));
            }
            _ => {
                i += ch.len_utf8();
            }
        }
    }
    tokens
}

/// Strip the delimiters off a quoted identifier; a no-op for bare words.
pub fn strip_identifier_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'`' && last == b'`') || (first == b'[' && last == b']') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Lower-case the last (table) segment of a possibly-qualified identifier
/// (`database.table`, `schema."Table"`), stripping quoting.
pub fn normalize_table_name(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parts: Vec<&str> = trimmed.split('.').collect();
    let last = parts.last().copied().unwrap_or(trimmed).trim();
    Some(strip_identifier_quotes(last).trim().to_ascii_lowercase())
}

const TABLE_INTRODUCERS: &[&str] = &["FROM", "JOIN", "INTO", "UPDATE", "TABLE"];

/// Walk the token stream and collect every table name referenced after
/// `FROM`/`JOIN`/`INTO`/`UPDATE`/`TABLE`, lower-cased and unqualified.
///
/// This is the same extraction routine used for read-only table allowlisting
/// in the teacher's SQL tool, generalized here to drive schema-grounding
/// validation and positional-column reconstruction.
pub fn extract_referenced_table_names(query: &str) -> BTreeSet<String> {
    let cleaned = strip_sql_comments_and_strings(query);
    let tokens = tokenize_sql(&cleaned);
    let mut tables = BTreeSet::new();

    let mut i = 0;
    while i < tokens.len() {
        let is_introducer = matches!(tokens[i], SqlToken::Word(w) if TABLE_INTRODUCERS.iter().any(|k| w.eq_ignore_ascii_case(k)));
        if is_introducer {
            i += 1;
            loop {
                let Some(ident_start) = tokens.get(i) else { break };
                let ident = match ident_start {
                    SqlToken::Word(w) | SqlToken::Quoted(w) => *w,
                    SqlToken::Punct(_) => break,
                };
                if ident.eq_ignore_ascii_case("SELECT") {
                    break;
                }
                let mut qualified = ident.to_string();
                let mut j = i + 1;
                while matches!(tokens.get(j), Some(SqlToken::Punct('.'))) {
                    if let Some(SqlToken::Word(w) | SqlToken::Quoted(w)) = tokens.get(j + 1) {
                        qualified.push('.');
                        qualified.push_str(w);
                        j += 2;
                    } else {
                        break;
                    }
                }
                if let Some(name) = normalize_table_name(&qualified) {
                    tables.insert(name);
                }
                i = j;
                // Skip an optional alias (bare word not followed by '.').
                if let Some(SqlToken::Word(w)) = tokens.get(i) {
                    if !TABLE_INTRODUCERS.iter().any(|k| w.eq_ignore_ascii_case(k))
                        && !matches!(w.to_ascii_uppercase().as_str(), "ON" | "WHERE" | "GROUP" | "ORDER" | "LIMIT" | "AS")
                    {
                        i += 1;
                    }
                }
                if matches!(tokens.get(i), Some(SqlToken::Word(w)) if w.eq_ignore_ascii_case("AS")) {
                    i += 1;
                    if matches!(tokens.get(i), Some(SqlToken::Word(_))) {
                        i += 1;
                    }
                }
                if matches!(tokens.get(i), Some(SqlToken::Punct(','))) {
                    i += 1;
                    continue;
                }
                break;
            }
        } else {
            i += 1;
        }
    }
    tables
}

/// Reconstruct the outer `SELECT` projection list's column names (or
/// `expr_N` for unaliased expressions), used when a driver returns positional
/// rows without column metadata.
pub fn extract_select_column_names(query: &str) -> Vec<String> {
    let cleaned = strip_sql_comments_and_strings(query);
    let tokens = tokenize_sql(&cleaned);

    let Some(select_idx) = tokens.iter().position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("SELECT")))
    else {
        return Vec::new();
    };
    let from_idx = tokens[select_idx..]
        .iter()
        .position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("FROM")))
        .map(|rel| select_idx + rel)
        .unwrap_or(tokens.len());

    let projection = &tokens[select_idx + 1..from_idx];
    let mut columns = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut depth = 0i32;
    let mut expr_counter = 0usize;

    let mut flush = |current: &mut Vec<&str>, expr_counter: &mut usize, columns: &mut Vec<String>| {
        if current.is_empty() {
            return;
        }
        let name = if let Some(as_pos) = current
            .iter()
            .rposition(|w| w.eq_ignore_ascii_case("AS"))
        {
            current.get(as_pos + 1).map(|s| strip_identifier_quotes(s).to_string())
        } else if current.len() >= 2 && !matches!(current[current.len() - 2].chars().next(), Some('(') | Some(',')) {
            // `expr alias` without AS: last bare word that isn't part of a function call.
            current.last().map(|s| strip_identifier_quotes(s).to_string())
        } else {
            None
        };
        let name = name.unwrap_or_else(|| {
            *expr_counter += 1;
            format!("expr_{expr_counter}")
        });
        columns.push(name);
        current.clear();
    };

    for tok in projection {
        match tok {
            SqlToken::Punct('(') => {
                depth += 1;
                current.push("(");
            }
            SqlToken::Punct(')') => {
                depth -= 1;
                current.push(")");
            }
            SqlToken::Punct(',') if depth == 0 => {
                flush(&mut current, &mut expr_counter, &mut columns);
            }
            SqlToken::Word(w) => current.push(w),
            SqlToken::Quoted(w) => current.push(w),
            SqlToken::Punct(_) => {}
        }
    }
    flush(&mut current, &mut expr_counter, &mut columns);
    columns
}
