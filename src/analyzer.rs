//! Heuristic N+1 query detection.
//!
//! Statements are normalized so that queries differing only by literal values
//! collapse onto one pattern:
//!
//! - lowercased and trimmed, whitespace collapsed
//! - string and numeric literals replaced with `?`
//! - `IN (...)` value lists collapsed to `(?)`
//! - spacing around `,` `(` `)` `=` removed
//! - truncated to [`MAX_PATTERN_LEN`] characters
//!
//! A transaction whose statements repeat one pattern at least `threshold`
//! times is flagged as a potential N+1. The result is advisory only.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MIN_N_PLUS_ONE_THRESHOLD;
use crate::parser::StatementShape;

/// Repeat count used when no threshold is configured.
pub const DEFAULT_REPEAT_THRESHOLD: usize = 5;

/// Normalized patterns longer than this are truncated.
pub const MAX_PATTERN_LEN: usize = 400;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").unwrap());

static NUMBER_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap());

static IN_VALUE_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\?(?:\s*,\s*\?)*\s*\)").unwrap());

static PUNCTUATION_SPACING: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*([,()=])\s*").unwrap());

/// Reduce a statement to its structural pattern.
pub fn normalize(sql: &str) -> String {
    let lowered = sql.trim().to_lowercase();
    let collapsed = WHITESPACE.replace_all(&lowered, " ");
    let strings = STRING_LITERAL.replace_all(&collapsed, "?");
    let numbers = NUMBER_LITERAL.replace_all(&strings, "?");
    let in_lists = IN_VALUE_LIST.replace_all(&numbers, "(?)");
    let pattern = PUNCTUATION_SPACING.replace_all(&in_lists, "$1");

    match pattern.char_indices().nth(MAX_PATTERN_LEN) {
        Some((cut, _)) => pattern[..cut].to_string(),
        None => pattern.into_owned(),
    }
}

/// Count occurrences of each normalized pattern.
pub fn pattern_counts<S: AsRef<str>>(queries: &[S]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for query in queries {
        *counts.entry(normalize(query.as_ref())).or_insert(0) += 1;
    }
    counts
}

/// `true` if any pattern repeats at least `repeat_threshold` times.
///
/// Thresholds below 2 are raised to 2.
pub fn detect_n_plus_one<S: AsRef<str>>(queries: &[S], repeat_threshold: usize) -> bool {
    let threshold = repeat_threshold.max(MIN_N_PLUS_ONE_THRESHOLD);
    if queries.len() < threshold {
        return false;
    }
    pattern_counts(queries).values().any(|&count| count >= threshold)
}

/// The most frequently repeated pattern in a statement list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedPattern {
    pub pattern: String,
    pub occurrences: usize,
    pub shape: StatementShape,
}

/// Find the pattern with the highest count. Ties resolve to the
/// lexicographically smallest pattern so results are deterministic.
pub fn most_repeated<S: AsRef<str>>(queries: &[S]) -> Option<RepeatedPattern> {
    pattern_counts(queries)
        .into_iter()
        .max_by(|(pa, ca), (pb, cb)| ca.cmp(cb).then_with(|| pb.cmp(pa)))
        .map(|(pattern, occurrences)| RepeatedPattern {
            shape: StatementShape::parse(&pattern),
            pattern,
            occurrences,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlOperation;

    #[test]
    fn test_normalize_literals_and_whitespace() {
        assert_eq!(
            normalize("SELECT  p.id,\n p.title FROM posts p WHERE p.user_id = 42"),
            "select p.id,p.title from posts p where p.user_id=?"
        );
        assert_eq!(
            normalize("select * from users where name = 'O''Brien' and score > 3.5"),
            "select * from users where name=? and score > ?"
        );
    }

    #[test]
    fn test_normalize_in_list() {
        assert_eq!(
            normalize("SELECT * FROM orders WHERE id IN (1, 2, 3)"),
            normalize("select * from orders where id in ('a','b')")
        );
        assert_eq!(
            normalize("SELECT * FROM orders WHERE id IN (1, 2, 3)"),
            "select * from orders where id in(?)"
        );
    }

    #[test]
    fn test_normalize_keeps_identifiers_with_digits() {
        assert_eq!(normalize("select c1 from t2"), "select c1 from t2");
    }

    #[test]
    fn test_normalize_truncates() {
        let long = format!("select {} from t", "x,".repeat(500));
        assert_eq!(normalize(&long).chars().count(), MAX_PATTERN_LEN);
    }

    #[test]
    fn test_detect_repeated_child_queries() {
        let mut queries = vec!["select u.id, u.name from users u where u.active = true".to_string()];
        for i in 1..=8 {
            queries.push(format!("select p.id, p.title from posts p where p.user_id = {i}"));
        }
        assert!(detect_n_plus_one(&queries, DEFAULT_REPEAT_THRESHOLD));
    }

    #[test]
    fn test_below_threshold_not_detected() {
        let mut queries = vec!["select * from users".to_string()];
        for i in 1..=3 {
            queries.push(format!("select * from posts where user_id = {i}"));
        }
        assert!(!detect_n_plus_one(&queries, DEFAULT_REPEAT_THRESHOLD));
    }

    #[test]
    fn test_threshold_floor() {
        let queries = ["select 1", "select 2"];
        assert!(detect_n_plus_one(&queries, 0));
        assert!(!detect_n_plus_one(&queries[..1], 0));
    }

    #[test]
    fn test_most_repeated() {
        let queries = [
            "SELECT * FROM users",
            "SELECT * FROM posts WHERE user_id = 1",
            "SELECT * FROM posts WHERE user_id = 2",
        ];
        let repeated = most_repeated(&queries).unwrap();
        assert_eq!(repeated.occurrences, 2);
        assert_eq!(repeated.shape.operation, SqlOperation::Select);
        assert_eq!(repeated.shape.table.as_deref(), Some("posts"));

        let empty: [&str; 0] = [];
        assert!(most_repeated(&empty).is_none());
    }
}
