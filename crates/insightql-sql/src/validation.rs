//! Static, schema-aware SQL validation: read-only enforcement, syntax sanity,
//! schema grounding, file-table-name rewriting, and `LIMIT` injection.

use crate::dialect::Dialect;
use crate::error::{Result, SqlError};
use crate::tokenizer::extract_referenced_table_names;
use std::collections::HashSet;

/// Forbidden top-level keywords; presence anywhere (case-insensitively) as a
/// standalone word rejects the statement outright.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE",
];

/// Reject any SQL containing a top-level DDL/DML verb, case-insensitively,
/// matched as a whole word so e.g. a column named `updated_at` does not trip
/// the `UPDATE` check.
pub fn enforce_read_only(sql: &str) -> Result<()> {
    let upper = sql.to_ascii_uppercase();
    for keyword in FORBIDDEN_KEYWORDS {
        if contains_word(&upper, keyword) {
            return Err(SqlError::NotReadOnly {
                keyword: (*keyword).to_string(),
            });
        }
    }
    Ok(())
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let wbytes = word.as_bytes();
    let mut start = 0;
    while let Some(rel) = haystack[start..].find(word) {
        let idx = start + rel;
        let before_ok = idx == 0 || !bytes[idx - 1].is_ascii_alphanumeric() && bytes[idx - 1] != b'_';
        let after_idx = idx + wbytes.len();
        let after_ok = after_idx >= bytes.len() || !bytes[after_idx].is_ascii_alphanumeric() && bytes[after_idx] != b'_';
        if before_ok && after_ok {
            return true;
        }
        start = idx + 1;
    }
    false
}

/// Balanced-structure and basic-shape sanity: quotes and parens balance, a
/// `SELECT` has a matching `FROM`, and the statement is not visibly truncated
/// (doesn't end mid-keyword or with a dangling operator).
pub fn check_syntax(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err(SqlError::SyntaxCheck("empty statement".to_string()));
    }

    let singles = trimmed.chars().filter(|&c| c == '\'').count();
    if singles % 2 != 0 {
        return Err(SqlError::SyntaxCheck("unbalanced single quotes".to_string()));
    }
    let doubles = trimmed.chars().filter(|&c| c == '"').count();
    if doubles % 2 != 0 {
        return Err(SqlError::SyntaxCheck("unbalanced double quotes".to_string()));
    }

    let mut depth = 0i32;
    for c in trimmed.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(SqlError::SyntaxCheck("unbalanced parentheses".to_string()));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SqlError::SyntaxCheck("unbalanced parentheses".to_string()));
    }

    let upper = trimmed.to_ascii_uppercase();
    if contains_word(&upper, "SELECT") && !contains_word(&upper, "FROM") {
        return Err(SqlError::SyntaxCheck("SELECT has no FROM clause".to_string()));
    }

    let last_non_space = trimmed.trim_end_matches(';').trim_end();
    const DANGLING_SUFFIXES: &[&str] = &["AND", "OR", "WHERE", "=", ",", "("];
    let upper_last = last_non_space.to_ascii_uppercase();
    if DANGLING_SUFFIXES
        .iter()
        .any(|s| upper_last.ends_with(s) && (s.len() > 1 || !last_non_space.ends_with(')')))
    {
        return Err(SqlError::SyntaxCheck("statement appears truncated".to_string()));
    }

    Ok(())
}

/// `true` if every table `sql` references exists in `known_tables` (case
/// insensitive, qualified-or-unqualified match). An empty `known_tables` set
/// means "schema unknown" — validation should be *skipped*, not treated as a
/// failure, so the caller distinguishes that case explicitly.
pub fn tables_are_grounded(sql: &str, known_tables: &HashSet<String>) -> Result<()> {
    let referenced = extract_referenced_table_names(sql);
    for table in &referenced {
        if !known_tables.iter().any(|k| k.eq_ignore_ascii_case(table)) {
            return Err(SqlError::UnknownTable(table.clone()));
        }
    }
    Ok(())
}

/// Rewrite every reference to `from_table` into `to_table`, quoted with the
/// dialect's identifier-quote characters, for the file-source canonicalization
/// rule (unrecognized table references become the file's canonical table name).
pub fn rewrite_table_reference(sql: &str, from_table: &str, to_table: &str, dialect: Dialect) -> String {
    let quoted = dialect.quote_identifier(to_table);
    let mut out = sql.to_string();
    for candidate in [from_table.to_string(), from_table.to_ascii_uppercase(), from_table.to_ascii_lowercase()] {
        out = replace_whole_word(&out, &candidate, &quoted);
    }
    out
}

fn replace_whole_word(haystack: &str, word: &str, replacement: &str) -> String {
    if word.is_empty() {
        return haystack.to_string();
    }
    let mut result = String::with_capacity(haystack.len());
    let bytes = haystack.as_bytes();
    let mut i = 0;
    while i < haystack.len() {
        let rest = &haystack[i..];
        if rest.len() >= word.len() && &rest[..word.len()] == word {
            let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
            let after_ok = bytes.get(i + word.len()).map_or(true, |b| !is_ident_byte(*b));
            if before_ok && after_ok {
                result.push_str(replacement);
                i += word.len();
                continue;
            }
        }
        let ch = rest.chars().next().unwrap_or('\0');
        result.push(ch);
        i += ch.len_utf8();
    }
    result
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Default row cap applied when a query has no explicit `LIMIT`/`COUNT`.
pub const DEFAULT_LIMIT: u32 = 1000;

/// Append a dialect-appropriate `LIMIT` clause when the statement has neither
/// `LIMIT` nor a top-level `COUNT` aggregate (which already bounds output to
/// one row).
pub fn inject_limit_if_absent(sql: &str, limit: u32) -> String {
    let upper = sql.to_ascii_uppercase();
    if contains_word(&upper, "LIMIT") || contains_word(&upper, "COUNT") {
        return sql.to_string();
    }
    let trimmed = sql.trim_end();
    let (body, trailing_semicolon) = match trimmed.strip_suffix(';') {
        Some(b) => (b, true),
        None => (trimmed, false),
    };
    let mut out = format!("{body} LIMIT {limit}");
    if trailing_semicolon {
        out.push(';');
    }
    out
}
