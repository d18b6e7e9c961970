//! Detection of placeholder and visibly corrupted SQL emitted by a model that
//! failed to ground its answer in the real schema, per the NL2SQL node's
//! programmatic post-checks.

use crate::error::{Result, SqlError};

const PLACEHOLDER_TOKENS: &[&str] = &["table_name", "column_name", "WHERE condition"];

/// `true` if `sql` looks like an unfilled template rather than a real query:
/// literal placeholder tokens, or a generic aggregate over a placeholder
/// column such as `AVG(column_name)`.
pub fn looks_like_placeholder(sql: &str) -> Option<String> {
    let lower = sql.to_ascii_lowercase();
    for token in PLACEHOLDER_TOKENS {
        if lower.contains(&token.to_ascii_lowercase()) {
            return Some(format!("contains placeholder token '{token}'"));
        }
    }
    if PLACEHOLDER_AGGREGATES.iter().any(|f| lower.contains(f)) {
        return Some("aggregate function applied to a placeholder column".to_string());
    }
    None
}

const PLACEHOLDER_AGGREGATES: &[&str] = &[
    "avg(column_name)",
    "sum(column_name)",
    "count(column_name)",
    "max(column_name)",
    "min(column_name)",
];

/// `true` if a short run of 2-3 character groups repeats at least `min_reps`
/// times consecutively — a signature of degenerate model output ("ababab...").
fn has_repeated_short_group(s: &str, min_reps: usize) -> bool {
    let chars: Vec<char> = s.chars().collect();
    for group_len in 2..=3 {
        if chars.len() < group_len * min_reps {
            continue;
        }
        let mut i = 0;
        while i + group_len * min_reps <= chars.len() {
            let group = &chars[i..i + group_len];
            let mut reps = 1;
            let mut j = i + group_len;
            while j + group_len <= chars.len() && &chars[j..j + group_len] == group {
                reps += 1;
                j += group_len;
            }
            if reps >= min_reps {
                return true;
            }
            i += 1;
        }
    }
    false
}

fn has_unbalanced_quotes(sql: &str) -> bool {
    let single = sql.chars().filter(|&c| c == '\'').count();
    let double = sql.chars().filter(|&c| c == '"').count();
    single % 2 != 0 || double % 2 != 0
}

fn has_unbalanced_parens(sql: &str) -> bool {
    let mut depth = 0i32;
    for c in sql.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => {}
        }
    }
    depth != 0
}

const INSTRUCTION_PHRASES: &[&str] = &[
    "select time bucket",
    "please provide",
    "i need more information",
    "as an ai",
    "i cannot",
    "here is the sql",
];

/// `true` if `text` reads like a natural-language instruction rather than SQL,
/// e.g. a model apology or a request for clarification where SQL was expected.
fn reads_like_instruction(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    let starts_with_select = lower.trim_start().starts_with("select")
        || lower.trim_start().starts_with("with");
    INSTRUCTION_PHRASES.iter().any(|p| lower.contains(p)) && !starts_with_select
}

fn has_embedded_json_artifact(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with('{') || trimmed.contains("\"sql_query\"") || trimmed.contains("```json")
}

/// `true` if `sql` is visibly corrupted: repeated short groups, unbalanced
/// quotes/parens, instructions standing in for SQL, or embedded JSON that
/// should have been unwrapped before reaching here.
pub fn looks_corrupted(sql: &str) -> Option<String> {
    if has_repeated_short_group(sql, 5) {
        return Some("repeated short character group (>=5 repetitions)".to_string());
    }
    if has_unbalanced_quotes(sql) {
        return Some("unbalanced quotes".to_string());
    }
    if has_unbalanced_parens(sql) {
        return Some("unbalanced parentheses".to_string());
    }
    if reads_like_instruction(sql) {
        return Some("reads like an instruction rather than a SQL statement".to_string());
    }
    if has_embedded_json_artifact(sql) {
        return Some("contains an embedded JSON artifact".to_string());
    }
    None
}

/// Strip wrapping quotes, markdown code fences, and common escape sequences,
/// then collapse internal whitespace runs to single spaces.
pub fn clean_sql_text(raw: &str) -> String {
    let mut s = raw.trim().to_string();

    if let Some(stripped) = s.strip_prefix("```sql") {
        s = stripped.to_string();
    } else if let Some(stripped) = s.strip_prefix("```") {
        s = stripped.to_string();
    }
    if let Some(stripped) = s.strip_suffix("```") {
        s = stripped.to_string();
    }
    let trimmed = s.trim();
    let unwrapped = if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    let unescaped = unwrapped.replace("\\n", " ").replace("\\\"", "\"").replace("\\'", "'");
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Run the clean → placeholder-check → corruption-check pipeline on a model's
/// raw SQL output, returning the cleaned statement or a structured rejection.
pub fn sanitize_generated_sql(raw: &str) -> Result<String> {
    let cleaned = clean_sql_text(raw);
    if cleaned.is_empty() {
        return Err(SqlError::Corrupted("empty SQL after cleaning".to_string()));
    }
    if let Some(reason) = looks_like_placeholder(&cleaned) {
        return Err(SqlError::Placeholder(reason));
    }
    if let Some(reason) = looks_corrupted(&cleaned) {
        return Err(SqlError::Corrupted(reason));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_placeholder_table_name() {
        assert!(looks_like_placeholder("SELECT * FROM table_name").is_some());
    }

    #[test]
    fn detects_placeholder_aggregate() {
        assert!(looks_like_placeholder("SELECT AVG(column_name) FROM table_name WHERE condition").is_some());
    }

    #[test]
    fn accepts_real_sql_as_non_placeholder() {
        assert!(looks_like_placeholder("SELECT SUM(amount) FROM orders").is_none());
    }

    #[test]
    fn detects_repeated_short_groups() {
        assert!(looks_corrupted("SELECT abababababab FROM t").is_some());
    }

    #[test]
    fn detects_unbalanced_quotes() {
        assert!(looks_corrupted("SELECT * FROM t WHERE name = 'unterminated").is_some());
    }

    #[test]
    fn detects_unbalanced_parens() {
        assert!(looks_corrupted("SELECT COUNT(* FROM t").is_some());
    }

    #[test]
    fn detects_instruction_text() {
        assert!(looks_corrupted("Select time bucket for the aggregation, please provide the date range").is_some());
    }

    #[test]
    fn accepts_well_formed_sql() {
        assert!(looks_corrupted("SELECT date_trunc('month', d) AS m, SUM(amount) FROM t GROUP BY m").is_none());
    }

    #[test]
    fn clean_strips_markdown_fence_and_quotes() {
        let cleaned = clean_sql_text("```sql\nSELECT 1\n```");
        assert_eq!(cleaned, "SELECT 1");
    }

    #[test]
    fn clean_collapses_whitespace() {
        let cleaned = clean_sql_text("SELECT   1,\n\t2");
        assert_eq!(cleaned, "SELECT 1, 2");
    }

    #[test]
    fn sanitize_rejects_placeholder() {
        assert!(matches!(
            sanitize_generated_sql("SELECT AVG(column_name) FROM table_name WHERE condition"),
            Err(SqlError::Placeholder(_))
        ));
    }

    #[test]
    fn sanitize_accepts_clean_query() {
        assert_eq!(
            sanitize_generated_sql("```sql\nSELECT SUM(amount) FROM orders\n```").unwrap(),
            "SELECT SUM(amount) FROM orders"
        );
    }
}
