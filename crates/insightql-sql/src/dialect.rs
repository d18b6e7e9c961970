//! Per-dialect SQL adapters: generation hints, pre-execution rewrites, and
//! identifier quoting, collapsed behind one interface so the executor selects
//! an adapter once per request rather than branching on dialect strings
//! throughout the codebase.

use crate::tokenizer::{strip_sql_comments_and_strings, tokenize_sql, SqlToken};
use std::collections::HashMap;

/// The SQL dialect a query is destined for. Each variant names the engine (or
/// engine family) whose syntax it speaks, not the underlying file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Dialect {
    /// The embedded in-process analytic engine (DuckDB-compatible syntax).
    Embedded,
    /// `ClickHouse`-class warehouses: no CTEs/window-function support assumed,
    /// `GROUP BY` must repeat expressions, tables qualified `database.table`.
    ClickHouse,
    /// Postgres-compatible direct-SQL sources.
    Postgres,
    /// MySQL-compatible direct-SQL sources.
    MySql,
    /// Generic ANSI SQL fallback used when no specific adapter applies.
    Generic,
}

impl Dialect {
    /// Parse a `sub_kind` string from a data-source descriptor into a dialect.
    #[must_use]
    pub fn from_sub_kind(sub_kind: &str) -> Self {
        match sub_kind.to_ascii_lowercase().as_str() {
            "clickhouse" => Self::ClickHouse,
            "postgres" | "postgresql" => Self::Postgres,
            "mysql" => Self::MySql,
            "csv" | "excel" | "xlsx" | "json" | "parquet" => Self::Embedded,
            _ => Self::Generic,
        }
    }

    /// The identifier-quoting character pair this dialect uses.
    #[must_use]
    pub fn identifier_quote(&self) -> (char, char) {
        match self {
            Self::MySql => ('`', '`'),
            _ => ('"', '"'),
        }
    }

    /// Quote `ident` with this dialect's identifier-quote characters.
    #[must_use]
    pub fn quote_identifier(&self, ident: &str) -> String {
        let (open, close) = self.identifier_quote();
        format!("{open}{ident}{close}")
    }

    /// Generation hints injected into the NL2SQL prompt for this dialect, per
    /// the rules enumerated in the NL2SQL node's contract.
    #[must_use]
    pub fn generation_hints(&self) -> &'static str {
        match self {
            Self::Embedded => {
                "Prefer date_trunc(...), CAST(col AS DATE), and COUNT(DISTINCT ...). \
                 Do not use warehouse-specific functions. The table is named `data` \
                 unless a file id is given. Guard empty-string checks defensively \
                 (col IS NOT NULL AND col != '')."
            }
            Self::ClickHouse => {
                "Do not use CTEs or window functions. GROUP BY must repeat the exact \
                 SELECT expression, not an alias. Qualify tables as database.table."
            }
            Self::Postgres | Self::MySql | Self::Generic => {
                "Use standard ANSI SQL; avoid engine-specific extensions."
            }
        }
    }

    /// Rewrite `sql` for this dialect's pre-execution compatibility rules.
    /// Returns the (possibly unchanged) statement.
    #[must_use]
    pub fn rewrite(&self, sql: &str) -> String {
        match self {
            Self::Embedded => rewrite_for_embedded(sql),
            Self::ClickHouse => rewrite_group_by_alias(&rewrite_lag_to_neighbor(sql)),
            Self::Postgres | Self::MySql | Self::Generic => sql.to_string(),
        }
    }
}

/// Translate warehouse dialect functions to the embedded engine's local
/// equivalents: `DATE_TRUNC` (any case) to `date_trunc`, and the
/// `SUBSTRING(col FROM pattern FOR len)`/`SUBSTRING(col FROM pattern+off)`
/// positional form to `SUBSTRING(col, POSITION(pattern IN col)+off)`.
fn rewrite_for_embedded(sql: &str) -> String {
    let mut out = replace_case_insensitive_word(sql, "DATE_TRUNC", "date_trunc");
    out = rewrite_substring_from(&out);
    out
}

fn replace_case_insensitive_word(sql: &str, from: &str, to: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let from_lower = from.to_ascii_lowercase();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &sql[i..];
        if rest.len() >= from.len()
            && rest[..from.len()].eq_ignore_ascii_case(from)
            && !is_ident_char(bytes.get(i.wrapping_sub(1)).copied())
            && !is_ident_char(bytes.get(i + from.len()).copied())
        {
            result.push_str(to);
            i += from.len();
            let _ = &from_lower;
        } else {
            let ch = rest.chars().next().unwrap_or('\0');
            result.push(ch);
            i += ch.len_utf8();
        }
    }
    result
}

fn is_ident_char(b: Option<u8>) -> bool {
    matches!(b, Some(c) if c.is_ascii_alphanumeric() || c == b'_')
}

/// Rewrite `SUBSTRING(col FROM pattern FOR len)` / `SUBSTRING(col FROM expr)`
/// into the comma-argument form the embedded engine expects, approximating
/// the offset form via `POSITION(... IN ...)`.
fn rewrite_substring_from(sql: &str) -> String {
    let lower = sql.to_ascii_lowercase();
    let Some(start) = lower.find("substring(") else {
        return sql.to_string();
    };
    let open = start + "substring(".len();
    let Some(close_rel) = sql[open..].find(')') else {
        return sql.to_string();
    };
    let close = open + close_rel;
    let inner = &sql[open..close];

    let Some(from_pos) = find_word_ci(inner, "from") else {
        return sql.to_string();
    };
    let col = inner[..from_pos].trim();
    let rest = inner[from_pos + "from".len()..].trim();

    let rewritten_inner = if let Some(for_pos) = find_word_ci(rest, "for") {
        let pattern = rest[..for_pos].trim();
        let len = rest[for_pos + "for".len()..].trim();
        format!("{col}, POSITION({pattern} IN {col}), {len}")
    } else {
        format!("{col}, POSITION({rest} IN {col})")
    };

    format!("{}{rewritten_inner}{}", &sql[..open], &sql[close..])
}

fn find_word_ci(haystack: &str, word: &str) -> Option<usize> {
    let lower = haystack.to_ascii_lowercase();
    let wl = word.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&wl) {
        let idx = search_from + rel;
        let before_ok = idx == 0 || !is_ident_char(haystack.as_bytes().get(idx - 1).copied());
        let after_ok = !is_ident_char(haystack.as_bytes().get(idx + word.len()).copied());
        if before_ok && after_ok {
            return Some(idx);
        }
        search_from = idx + 1;
    }
    None
}

/// Replace `lag(x) OVER (...)` with `neighbor(x,-1) OVER (...)`, the
/// window-function compatibility shim ClickHouse's native SQL needs since it
/// lacks the standard `LAG`/`LEAD` window functions.
fn rewrite_lag_to_neighbor(sql: &str) -> String {
    let lower = sql.to_ascii_lowercase();
    let Some(lag_pos) = find_word_ci(&lower, "lag") else {
        return sql.to_string();
    };
    let after = sql[lag_pos + 3..].trim_start();
    if !after.starts_with('(') {
        return sql.to_string();
    }
    let open = lag_pos + 3 + (sql[lag_pos + 3..].len() - after.len());
    let Some(close_rel) = sql[open..].find(')') else {
        return sql.to_string();
    };
    let close = open + close_rel;
    let arg = sql[open + 1..close].trim();
    format!("{}neighbor({arg},-1){}", &sql[..lag_pos], &sql[close + 1..])
}

/// Rewrite `GROUP BY alias` to `GROUP BY <expression>` when `alias` is
/// defined in the `SELECT` list, since ClickHouse-class engines require the
/// `GROUP BY` clause to repeat the exact projected expression rather than
/// reference its alias.
pub fn rewrite_group_by_alias(sql: &str) -> String {
    let cleaned = strip_sql_comments_and_strings(sql);
    let tokens = tokenize_sql(&cleaned);

    let Some(select_idx) = tokens.iter().position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("select"))) else {
        return sql.to_string();
    };
    let Some(from_idx) = tokens[select_idx..]
        .iter()
        .position(|t| matches!(t, SqlToken::Word(w) if w.eq_ignore_ascii_case("from")))
        .map(|rel| select_idx + rel)
    else {
        return sql.to_string();
    };

    let aliases = collect_select_aliases(&tokens[select_idx + 1..from_idx], sql, &cleaned, select_idx + 1);

    let lower = sql.to_ascii_lowercase();
    let Some(group_by_pos) = lower.find("group by") else {
        return sql.to_string();
    };
    let clause_start = group_by_pos + "group by".len();
    let clause_end = ["order by", "having", "limit"]
        .iter()
        .filter_map(|kw| lower[clause_start..].find(kw).map(|p| clause_start + p))
        .min()
        .unwrap_or(sql.len());

    let clause = &sql[clause_start..clause_end];
    let mut rewritten = String::new();
    for part in clause.split(',') {
        let trimmed = part.trim();
        if !rewritten.is_empty() {
            rewritten.push_str(", ");
        }
        match aliases.get(&trimmed.to_ascii_lowercase()) {
            Some(expr) => rewritten.push_str(expr),
            None => rewritten.push_str(trimmed),
        }
    }

    format!("{}{}{}", &sql[..clause_start], format!(" {rewritten} "), &sql[clause_end..])
}

/// Map each `SELECT`-list alias (`expr AS alias`) to its defining expression
/// text, by locating comma-separated top-level projection items in the
/// original (un-stripped) source so we can slice out verbatim expression text.
fn collect_select_aliases(
    projection_tokens: &[SqlToken<'_>],
    original: &str,
    cleaned: &str,
    _token_offset: usize,
) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    let mut depth = 0i32;
    let mut current: Vec<&str> = Vec::new();

    let mut flush = |current: &mut Vec<&str>, aliases: &mut HashMap<String, String>| {
        if current.is_empty() {
            return;
        }
        if let Some(as_pos) = current.iter().rposition(|w| w.eq_ignore_ascii_case("AS")) {
            if let Some(alias) = current.get(as_pos + 1) {
                let expr = current[..as_pos].join(" ");
                aliases.insert(alias.to_ascii_lowercase(), expr);
            }
        } else if current.len() >= 2 {
            let alias = current[current.len() - 1];
            let expr = current[..current.len() - 1].join(" ");
            aliases.insert(alias.to_ascii_lowercase(), expr);
        }
        current.clear();
    };

    for tok in projection_tokens {
        match tok {
            SqlToken::Punct('(') => {
                depth += 1;
                current.push("(");
            }
            SqlToken::Punct(')') => {
                depth -= 1;
                current.push(")");
            }
            SqlToken::Punct(',') if depth == 0 => flush(&mut current, &mut aliases),
            SqlToken::Word(w) | SqlToken::Quoted(w) => current.push(w),
            SqlToken::Punct(_) => {}
        }
    }
    flush(&mut current, &mut aliases);
    let _ = (original, cleaned);
    aliases
}
