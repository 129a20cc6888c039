//! Safety Validator
//!
//! Single-pass ALLOW/DENY decision over a SQL string. All rules are
//! evaluated (violations are collected, not short-circuited) so a caller
//! sees every problem at once. The validator performs no I/O and never
//! panics on malformed input: text it cannot make sense of is DENY with
//! the `unparseable` rule, never a silent ALLOW.
//!
//! String literals, quoted identifiers and comments are masked out before
//! any keyword scan, so a `DROP` inside a quoted string can never trigger
//! a rule.

use crate::sql_guard::lexical;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifier of one safety rule. Serialized as a stable snake_case string
/// so verdicts can be persisted by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    /// Leading keyword must be SELECT or WITH
    StatementType,
    /// Exactly one top-level statement allowed
    MultiStatement,
    /// DDL/DML keyword outside string literals and comments
    ForbiddenKeyword,
    /// A branch of a UNION/INTERSECT/EXCEPT does not start with SELECT/WITH
    SetOperation,
    /// Referenced table outside the allowed dataset scope
    DatasetScope,
    /// Input could not be interpreted as SQL at all
    Unparseable,
}

/// Outcome of one validation call. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub is_valid: bool,
    pub violated_rules: Vec<RuleId>,
    pub message: String,
}

impl Verdict {
    pub fn violates(&self, rule: RuleId) -> bool {
        self.violated_rules.contains(&rule)
    }
}

lazy_static! {
    /// Keywords that are never allowed at the top level of a read-only query.
    static ref FORBIDDEN_KEYWORD_RE: Regex = Regex::new(
        r"(?i)\b(insert|update|delete|drop|alter|create|truncate|merge|grant|revoke|call)\b"
    )
    .unwrap();
}

/// Validate `sql` against the read-only safety policy.
///
/// When `allowed_dataset_scope` is supplied, every referenced table must
/// resolve inside one of the scope prefixes (e.g. `"myproject.analytics"`);
/// unqualified names cannot be resolved and are out of scope by definition.
pub fn validate(sql: &str, allowed_dataset_scope: Option<&[String]>) -> Verdict {
    let mut violations: Vec<(RuleId, String)> = Vec::new();

    let masked = mask_literals_and_comments(sql);
    if masked.trim().is_empty() {
        return deny(vec![(
            RuleId::Unparseable,
            "Input is empty or contains no SQL".to_string(),
        )]);
    }

    let statements = split_statements(&masked);
    if statements.is_empty() {
        return deny(vec![(
            RuleId::Unparseable,
            "Input is empty or contains no SQL".to_string(),
        )]);
    }

    // Rule 2: exactly one non-empty statement (one trailing semicolon is fine).
    if statements.len() > 1 {
        violations.push((
            RuleId::MultiStatement,
            format!(
                "Expected a single statement, found {} separated by semicolons",
                statements.len()
            ),
        ));
    }

    // Rule 1: every top-level statement must start with SELECT or WITH, so a
    // payload smuggled in after a semicolon is flagged on its own keyword.
    for statement in &statements {
        match leading_keyword(statement) {
            Some(keyword) if keyword == "select" || keyword == "with" => {}
            Some(keyword) => violations.push((
                RuleId::StatementType,
                format!("Statement type '{}' is not allowed; only SELECT/WITH queries may run", keyword.to_uppercase()),
            )),
            None => violations.push((
                RuleId::Unparseable,
                "Statement has no recognizable leading keyword".to_string(),
            )),
        }
    }

    // Rule 3: forbidden keywords anywhere outside literals/comments. A bare
    // column actually named `update` must be quoted to pass; false DENY is
    // the conservative direction for a guard fronting a billed warehouse.
    let mut flagged: Vec<String> = Vec::new();
    for found in FORBIDDEN_KEYWORD_RE.find_iter(&masked) {
        let keyword = found.as_str().to_lowercase();
        if !flagged.contains(&keyword) {
            flagged.push(keyword);
        }
    }
    if !flagged.is_empty() {
        violations.push((
            RuleId::ForbiddenKeyword,
            format!(
                "Forbidden keyword(s) present: {}",
                flagged
                    .iter()
                    .map(|k| k.to_uppercase())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        ));
    }

    // Rule 4: set operations are permitted, but every branch must itself be
    // a SELECT/WITH query.
    for statement in &statements {
        let branches = split_set_operation_branches(statement);
        if branches.len() < 2 {
            continue;
        }
        for branch in &branches {
            match branch_leading_keyword(branch) {
                Some(keyword) if keyword == "select" || keyword == "with" => {}
                Some(keyword) => violations.push((
                    RuleId::SetOperation,
                    format!(
                        "Set-operation branch starts with '{}' instead of SELECT/WITH",
                        keyword.to_uppercase()
                    ),
                )),
                None => violations.push((
                    RuleId::SetOperation,
                    "Set-operation branch is empty".to_string(),
                )),
            }
        }
    }

    // Rule 5: optional dataset scope over the extracted table set.
    if let Some(scope) = allowed_dataset_scope {
        let references = lexical::extract(sql);
        for table in &references.tables {
            if !table_in_scope(table, scope) {
                violations.push((
                    RuleId::DatasetScope,
                    format!("Table '{}' is outside the allowed dataset scope", table),
                ));
            }
        }
    }

    if violations.is_empty() {
        Verdict {
            is_valid: true,
            violated_rules: Vec::new(),
            message: "SQL passed all safety checks".to_string(),
        }
    } else {
        deny(violations)
    }
}

fn deny(violations: Vec<(RuleId, String)>) -> Verdict {
    let mut rules: Vec<RuleId> = Vec::new();
    for (rule, _) in &violations {
        if !rules.contains(rule) {
            rules.push(*rule);
        }
    }
    let message = violations
        .iter()
        .map(|(_, detail)| detail.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    Verdict {
        is_valid: false,
        violated_rules: rules,
        message,
    }
}

/// Replace string literals, quoted identifiers and comments with spaces,
/// preserving text length so offsets remain comparable.
fn mask_literals_and_comments(sql: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Normal,
        SingleQuote,
        DoubleQuote,
        Backtick,
        LineComment,
        BlockComment,
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut out: Vec<char> = Vec::with_capacity(chars.len());
    let mut state = State::Normal;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            State::Normal => match c {
                '\'' => {
                    state = State::SingleQuote;
                    out.push(' ');
                }
                '"' => {
                    state = State::DoubleQuote;
                    out.push(' ');
                }
                '`' => {
                    state = State::Backtick;
                    out.push(' ');
                }
                '-' if next == Some('-') => {
                    state = State::LineComment;
                    out.push(' ');
                    out.push(' ');
                    i += 1;
                }
                '/' if next == Some('*') => {
                    state = State::BlockComment;
                    out.push(' ');
                    out.push(' ');
                    i += 1;
                }
                _ => out.push(c),
            },
            State::SingleQuote => {
                if c == '\\' && next.is_some() {
                    out.push(' ');
                    out.push(' ');
                    i += 1;
                } else if c == '\'' && next == Some('\'') {
                    // escaped quote inside the literal
                    out.push(' ');
                    out.push(' ');
                    i += 1;
                } else {
                    if c == '\'' {
                        state = State::Normal;
                    }
                    out.push(' ');
                }
            }
            State::DoubleQuote => {
                if c == '\\' && next.is_some() {
                    out.push(' ');
                    out.push(' ');
                    i += 1;
                } else {
                    if c == '"' {
                        state = State::Normal;
                    }
                    out.push(' ');
                }
            }
            State::Backtick => {
                if c == '`' {
                    state = State::Normal;
                }
                out.push(' ');
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = State::Normal;
                    out.push(' ');
                    out.push(' ');
                    i += 1;
                } else {
                    out.push(' ');
                }
            }
        }
        i += 1;
    }

    out.into_iter().collect()
}

/// Non-empty statement slices of masked text, split on top-level semicolons.
fn split_statements(masked: &str) -> Vec<String> {
    masked
        .split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// First alphabetic token of a statement; leading parentheses and
/// whitespace are skipped.
fn leading_keyword(statement: &str) -> Option<String> {
    let rest = statement.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    let keyword: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .collect();
    if keyword.is_empty() {
        None
    } else {
        Some(keyword.to_lowercase())
    }
}

/// Like `leading_keyword`, but steps over the ALL/DISTINCT that may follow
/// a set operator.
fn branch_leading_keyword(branch: &str) -> Option<String> {
    let mut rest = branch;
    loop {
        let keyword = leading_keyword(rest)?;
        if keyword == "all" || keyword == "distinct" {
            let skip = rest
                .find(|c: char| c.is_ascii_alphabetic())
                .map(|start| start + keyword.len())
                .unwrap_or(rest.len());
            rest = &rest[skip..];
            continue;
        }
        return Some(keyword);
    }
}

/// Split a masked statement at top-level UNION/INTERSECT/EXCEPT keywords.
/// `EXCEPT(` is the projection form (`SELECT * EXCEPT(col)`), not a set
/// operation, and does not open a branch.
fn split_set_operation_branches(masked: &str) -> Vec<String> {
    let chars: Vec<char> = masked.chars().collect();
    let mut branches = Vec::new();
    let mut depth: i32 = 0;
    let mut branch_start = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '(' {
            depth += 1;
            i += 1;
            continue;
        }
        if c == ')' {
            depth -= 1;
            i += 1;
            continue;
        }
        if depth == 0 && c.is_ascii_alphabetic() {
            let word_start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[word_start..i].iter().collect::<String>().to_lowercase();
            let splits_here = match word.as_str() {
                "union" | "intersect" => true,
                "except" => !followed_by_open_paren(&chars, i),
                _ => false,
            };
            if splits_here {
                branches.push(chars[branch_start..word_start].iter().collect());
                branch_start = i;
            }
            continue;
        }
        i += 1;
    }
    branches.push(chars[branch_start..].iter().collect());
    branches
}

fn followed_by_open_paren(chars: &[char], from: usize) -> bool {
    chars[from..]
        .iter()
        .find(|c| !c.is_whitespace())
        .copied()
        == Some('(')
}

/// A table is in scope when some scope entry is the table itself or a
/// dotted prefix of it. Bare names carry no dataset and never match.
fn table_in_scope(table: &str, scope: &[String]) -> bool {
    let table_lower = table.to_lowercase();
    scope.iter().any(|entry| {
        let entry_lower = entry.to_lowercase();
        table_lower == entry_lower || table_lower.starts_with(&format!("{}.", entry_lower))
    })
}
