//! Identifier Classifier
//!
//! Decides whether a bare dotted/bracketed token found in SQL text is a
//! table reference, a column reference, or a function call, from lexical
//! and positional evidence alone. Pure function of its inputs: it never
//! errors and performs no I/O. Callers treat `Unknown` as `Column`, which
//! keeps whitelist checks conservative (an identifier we cannot prove is a
//! table must never widen the table set).

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Table,
    Column,
    Function,
    Unknown,
}

lazy_static! {
    /// Functions and non-table keywords commonly seen bare in SQL text.
    static ref KNOWN_FUNCTIONS: HashSet<&'static str> = [
        "count", "sum", "avg", "min", "max", "cast", "safe_cast", "coalesce",
        "ifnull", "nullif", "concat", "substr", "substring", "trim", "lower",
        "upper", "length", "round", "floor", "ceil", "abs", "date", "datetime",
        "timestamp", "time", "extract", "date_add", "date_sub", "date_diff",
        "date_trunc", "timestamp_add", "timestamp_sub", "timestamp_diff",
        "timestamp_trunc", "format_date", "format_timestamp", "parse_date",
        "current_date", "current_timestamp", "current_time", "generate_uuid",
        "array_agg", "string_agg", "array_length", "unnest", "struct", "array",
        "row_number", "rank", "dense_rank", "lag", "lead", "ntile",
        "first_value", "last_value", "regexp_contains", "regexp_extract",
        "regexp_replace", "split", "starts_with", "ends_with", "replace",
        "greatest", "least", "if", "case", "exists", "any_value",
        "approx_count_distinct", "countif", "sumif", "safe_divide", "mod",
        "power", "sqrt", "ln", "log", "log10", "exp",
    ]
    .into_iter()
    .collect();
}

/// Classify `identifier` using its occurrences inside `query`.
///
/// Heuristics in priority order:
/// 1. immediately followed by `(`            -> Function
/// 2. directly after a FROM/JOIN keyword     -> Table
/// 3. dotted, prefix is a table in the query -> Column
/// 4. known SQL function name                -> Function
/// 5. otherwise                              -> Unknown
pub fn classify(identifier: &str, query: &str) -> IdentifierKind {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return IdentifierKind::Unknown;
    }

    let query_lower = query.to_lowercase();
    let ident_lower = identifier.to_lowercase();

    for position in token_occurrences(&query_lower, &ident_lower) {
        if followed_by_paren(&query_lower, position + ident_lower.len()) {
            return IdentifierKind::Function;
        }
    }

    for position in token_occurrences(&query_lower, &ident_lower) {
        if preceded_by_from_or_join(&query_lower, position) {
            return IdentifierKind::Table;
        }
    }

    if let Some((prefix, _)) = ident_lower.rsplit_once('.') {
        if token_occurrences(&query_lower, prefix)
            .into_iter()
            .any(|pos| preceded_by_from_or_join(&query_lower, pos))
        {
            return IdentifierKind::Column;
        }
    }

    let base = ident_lower.rsplit('.').next().unwrap_or(&ident_lower);
    if KNOWN_FUNCTIONS.contains(base) {
        return IdentifierKind::Function;
    }

    IdentifierKind::Unknown
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$'
}

/// Byte offsets of token-bounded occurrences of `token` in `text`.
fn token_occurrences(text: &str, token: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut search_from = 0;
    while let Some(found) = text[search_from..].find(token) {
        let start = search_from + found;
        let end = start + token.len();
        let before_ok = start == 0
            || !text[..start]
                .chars()
                .next_back()
                .map(is_ident_char)
                .unwrap_or(false);
        let after_ok = end >= text.len()
            || !text[end..].chars().next().map(is_ident_char).unwrap_or(false);
        if before_ok && after_ok {
            positions.push(start);
        }
        search_from = end;
    }
    positions
}

fn followed_by_paren(text: &str, from: usize) -> bool {
    text[from..].chars().find(|c| !c.is_whitespace()) == Some('(')
}

/// True when the token at `position` directly follows a FROM or JOIN
/// keyword, allowing intervening whitespace and backtick/bracket quoting.
fn preceded_by_from_or_join(text: &str, position: usize) -> bool {
    let mut before: Vec<char> = text[..position].chars().collect();
    while matches!(before.last(), Some(c) if c.is_whitespace() || *c == '`' || *c == '[') {
        before.pop();
    }
    let tail: String = before.iter().collect();
    tail.ends_with("from") || tail.ends_with("join")
}
