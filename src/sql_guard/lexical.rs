//! SQL Lexical Extractor
//!
//! Extracts the referenced tables, columns and join predicates from raw SQL
//! text. A structural pass over the `sqlparser` AST handles well-formed
//! queries (CTE names excluded, aliases resolved, three-part names kept
//! whole); malformed input degrades to tolerant regex scans. The extractor
//! never errors: input it cannot make sense of yields empty sets.

use crate::sql_guard::classifier::{classify, IdentifierKind};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, Join, JoinConstraint, JoinOperator,
    ObjectName, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Full => write!(f, "FULL"),
            JoinType::Cross => write!(f, "CROSS"),
        }
    }
}

/// One join predicate. Table/column endpoints are best-effort: `None` when
/// they cannot be derived from the text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinInfo {
    pub left_table: Option<String>,
    pub right_table: Option<String>,
    pub left_column: Option<String>,
    pub right_column: Option<String>,
    pub join_type: JoinType,
    pub condition_text: String,
}

/// References found in one SQL string. `tables` and `columns` preserve
/// original casing and first-appearance order; membership is
/// case-insensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqlReferences {
    pub tables: Vec<String>,
    pub columns: Vec<String>,
    pub joins: Vec<JoinInfo>,
}

impl SqlReferences {
    pub fn contains_table(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.tables.iter().any(|t| t.to_lowercase() == key)
    }

    pub fn contains_column(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.columns.iter().any(|c| c.to_lowercase() == key)
    }
}

/// Extract table, column and join references from `sql`.
pub fn extract(sql: &str) -> SqlReferences {
    let mut acc = match structural_extract(sql) {
        Some(acc) => acc,
        None => fallback_extract(sql),
    };

    acc.tables = std::mem::take(&mut acc.tables)
        .into_iter()
        .unique_by(|t| t.to_lowercase())
        .collect();
    acc.columns = std::mem::take(&mut acc.columns)
        .into_iter()
        .unique_by(|c| c.to_lowercase())
        .collect();
    acc
}

// ---------------------------------------------------------------------------
// Structural pass
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WalkState {
    refs: SqlReferences,
    ctes: HashSet<String>,
}

fn structural_extract(sql: &str) -> Option<SqlReferences> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql).ok()?;
    if statements.is_empty() {
        return None;
    }

    let mut state = WalkState::default();
    for statement in &statements {
        match statement {
            Statement::Query(query) => walk_query(query, &mut state),
            // Anything but a query form is better served by the tolerant scan.
            _ => return None,
        }
    }
    Some(state.refs)
}

fn walk_query(query: &Query, state: &mut WalkState) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            state.ctes.insert(cte.alias.name.value.to_lowercase());
            walk_query(&cte.query, state);
        }
    }
    walk_set_expr(&query.body, state);
}

fn walk_set_expr(body: &SetExpr, state: &mut WalkState) {
    match body {
        SetExpr::Select(select) => walk_select(select, state),
        SetExpr::Query(query) => walk_query(query, state),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, state);
            walk_set_expr(right, state);
        }
        _ => {}
    }
}

fn walk_select(select: &Select, state: &mut WalkState) {
    let mut local_tables: Vec<String> = Vec::new();
    let mut aliases: HashMap<String, String> = HashMap::new();

    for table_with_joins in &select.from {
        let mut previous =
            collect_table_factor(&table_with_joins.relation, state, &mut aliases);
        if let Some(name) = previous.clone() {
            local_tables.push(name);
        }
        for join in &table_with_joins.joins {
            let right = collect_table_factor(&join.relation, state, &mut aliases);
            if let Some(name) = right.clone() {
                local_tables.push(name);
            }
            let info = build_join_info(
                join,
                previous.clone(),
                right.clone(),
                &local_tables,
                &aliases,
                state,
            );
            state.refs.joins.push(info);
            if right.is_some() {
                previous = right;
            }
        }
    }

    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                collect_expr_columns(expr, state)
            }
            _ => {}
        }
    }
    if let Some(selection) = &select.selection {
        collect_expr_columns(selection, state);
    }
}

/// Record a table factor and return the name other clauses refer to it by.
fn collect_table_factor(
    factor: &TableFactor,
    state: &mut WalkState,
    aliases: &mut HashMap<String, String>,
) -> Option<String> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let table_name = object_name_to_string(name);
            if !state.ctes.contains(&table_name.to_lowercase()) {
                state.refs.tables.push(table_name.clone());
            }
            if let Some(alias) = alias {
                aliases.insert(alias.name.value.to_lowercase(), table_name.clone());
            }
            Some(table_name)
        }
        TableFactor::Derived { subquery, alias, .. } => {
            walk_query(subquery, state);
            alias.as_ref().map(|a| a.name.value.clone())
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            let inner = collect_table_factor(&table_with_joins.relation, state, aliases);
            for join in &table_with_joins.joins {
                collect_table_factor(&join.relation, state, aliases);
            }
            inner
        }
        _ => None,
    }
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn build_join_info(
    join: &Join,
    left_context: Option<String>,
    right_context: Option<String>,
    local_tables: &[String],
    aliases: &HashMap<String, String>,
    state: &mut WalkState,
) -> JoinInfo {
    let (join_type, constraint) = match &join.join_operator {
        JoinOperator::Inner(c) => (JoinType::Inner, Some(c)),
        JoinOperator::LeftOuter(c) => (JoinType::Left, Some(c)),
        JoinOperator::RightOuter(c) => (JoinType::Right, Some(c)),
        JoinOperator::FullOuter(c) => (JoinType::Full, Some(c)),
        JoinOperator::LeftSemi(c) | JoinOperator::LeftAnti(c) => (JoinType::Left, Some(c)),
        JoinOperator::RightSemi(c) | JoinOperator::RightAnti(c) => (JoinType::Right, Some(c)),
        JoinOperator::CrossJoin | JoinOperator::CrossApply | JoinOperator::OuterApply => {
            (JoinType::Cross, None)
        }
    };

    let mut info = JoinInfo {
        left_table: left_context.clone(),
        right_table: right_context.clone(),
        left_column: None,
        right_column: None,
        join_type,
        condition_text: String::new(),
    };

    match constraint {
        Some(JoinConstraint::On(expr)) => {
            info.condition_text = expr.to_string();
            collect_expr_columns(expr, state);
            if let Some((left, right)) = find_equality_pair(expr) {
                let (lt, lc) = resolve_endpoint(&left, local_tables, aliases);
                let (rt, rc) = resolve_endpoint(&right, local_tables, aliases);
                info.left_table = lt.or(left_context);
                info.right_table = rt.or(right_context);
                info.left_column = Some(lc);
                info.right_column = Some(rc);
            } else if let Some((left, right)) = regex_equality_pair(&info.condition_text) {
                let (lt, lc) = resolve_endpoint(&left, local_tables, aliases);
                let (rt, rc) = resolve_endpoint(&right, local_tables, aliases);
                info.left_table = lt.or(left_context);
                info.right_table = rt.or(right_context);
                info.left_column = Some(lc);
                info.right_column = Some(rc);
            }
        }
        Some(JoinConstraint::Using(columns)) => {
            let names: Vec<String> = columns.iter().map(|c| c.value.clone()).collect();
            info.condition_text = format!("USING ({})", names.join(", "));
            info.left_column = names.first().cloned();
            info.right_column = names.first().cloned();
        }
        _ => {}
    }

    info
}

/// First `a = b` pair between identifiers inside an ON expression,
/// descending through AND chains and parentheses.
fn find_equality_pair(expr: &Expr) -> Option<(Vec<String>, Vec<String>)> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::Eq => {
                let l = identifier_parts(left)?;
                let r = identifier_parts(right)?;
                Some((l, r))
            }
            BinaryOperator::And => {
                find_equality_pair(left).or_else(|| find_equality_pair(right))
            }
            _ => None,
        },
        Expr::Nested(inner) => find_equality_pair(inner),
        _ => None,
    }
}

fn identifier_parts(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Identifier(ident) => Some(vec![ident.value.clone()]),
        Expr::CompoundIdentifier(idents) => {
            Some(idents.iter().map(|i| i.value.clone()).collect())
        }
        Expr::Nested(inner) => identifier_parts(inner),
        _ => None,
    }
}

/// Split a dotted endpoint into (table, column), resolving aliases and
/// preferring a qualifier that names a table already in scope.
fn resolve_endpoint(
    parts: &[String],
    local_tables: &[String],
    aliases: &HashMap<String, String>,
) -> (Option<String>, String) {
    let column = parts.last().cloned().unwrap_or_default();
    if parts.len() < 2 {
        return (None, column);
    }

    let qualifier = parts[..parts.len() - 1].join(".");
    let qualifier_lower = qualifier.to_lowercase();

    if let Some(table) = aliases.get(&qualifier_lower) {
        return (Some(table.clone()), column);
    }
    for table in local_tables {
        if table.to_lowercase() == qualifier_lower {
            return (Some(table.clone()), column);
        }
    }
    (Some(qualifier), column)
}

fn collect_expr_columns(expr: &Expr, state: &mut WalkState) {
    match expr {
        Expr::Identifier(ident) => state.refs.columns.push(ident.value.clone()),
        Expr::CompoundIdentifier(idents) => {
            let dotted = idents
                .iter()
                .map(|i| i.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            state.refs.columns.push(dotted);
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr_columns(left, state);
            collect_expr_columns(right, state);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::IsNull(expr)
        | Expr::IsNotNull(expr) => collect_expr_columns(expr, state),
        Expr::Cast { expr, .. } => collect_expr_columns(expr, state),
        Expr::Between {
            expr, low, high, ..
        } => {
            collect_expr_columns(expr, state);
            collect_expr_columns(low, state);
            collect_expr_columns(high, state);
        }
        Expr::InList { expr, list, .. } => {
            collect_expr_columns(expr, state);
            for item in list {
                collect_expr_columns(item, state);
            }
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            collect_expr_columns(expr, state);
            collect_expr_columns(pattern, state);
        }
        Expr::Function(function) => {
            for arg in &function.args {
                let arg_expr = match arg {
                    FunctionArg::Named { arg, .. } => arg,
                    FunctionArg::Unnamed(arg) => arg,
                };
                if let FunctionArgExpr::Expr(expr) = arg_expr {
                    collect_expr_columns(expr, state);
                }
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Regex fallback for text the parser rejects
// ---------------------------------------------------------------------------

lazy_static! {
    static ref TABLE_AFTER_KEYWORD_RE: Regex = Regex::new(
        r#"(?i)\b(from|join)\s+[`"\[]?([A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*){0,2})"#
    )
    .unwrap();
    static ref JOIN_CLAUSE_RE: Regex = Regex::new(
        r#"(?i)\b((?:inner|left(?:\s+outer)?|right(?:\s+outer)?|full(?:\s+outer)?|cross)\s+join|join)\s+[`"\[]?([A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*){0,2})"#
    )
    .unwrap();
    static ref ON_KEYWORD_RE: Regex = Regex::new(r"(?i)\bon\b").unwrap();
    static ref CLAUSE_BOUNDARY_RE: Regex = Regex::new(
        r"(?i)\b(inner|left|right|full|cross|join|where|group|order|limit|having|union|intersect|except)\b|;"
    )
    .unwrap();
    static ref EQ_PAIR_RE: Regex = Regex::new(
        r"([A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*){1,3})\s*=\s*([A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*){1,3})"
    )
    .unwrap();
    static ref DOTTED_IDENT_RE: Regex =
        Regex::new(r"\b[A-Za-z_][\w$]*(?:\.[A-Za-z_][\w$]*)+\b").unwrap();
}

fn fallback_extract(sql: &str) -> SqlReferences {
    let mut refs = SqlReferences::default();

    // Tables: identifiers after FROM/JOIN, filtered through the classifier.
    let mut table_positions: Vec<(usize, String)> = Vec::new();
    for captures in TABLE_AFTER_KEYWORD_RE.captures_iter(sql) {
        if let Some(matched) = captures.get(2) {
            let candidate = matched.as_str().to_string();
            match classify(&candidate, sql) {
                IdentifierKind::Column | IdentifierKind::Function => {}
                _ => {
                    table_positions.push((matched.start(), candidate.clone()));
                    refs.tables.push(candidate);
                }
            }
        }
    }

    // Joins: join keyword, right-hand table, then the ON condition slice.
    for captures in JOIN_CLAUSE_RE.captures_iter(sql) {
        let keyword = captures.get(1).map(|m| m.as_str()).unwrap_or("join");
        let right_match = match captures.get(2) {
            Some(m) => m,
            None => continue,
        };
        let join_start = captures.get(0).map(|m| m.start()).unwrap_or(0);
        let left_table = table_positions
            .iter()
            .rev()
            .find(|(pos, _)| *pos < join_start)
            .map(|(_, name)| name.clone());

        let mut info = JoinInfo {
            left_table,
            right_table: Some(right_match.as_str().to_string()),
            left_column: None,
            right_column: None,
            join_type: join_type_from_keyword(keyword),
            condition_text: String::new(),
        };

        if let Some(condition) = on_condition_slice(sql, right_match.end()) {
            info.condition_text = condition.trim().to_string();
            if let Some((left, right)) = regex_equality_pair(&info.condition_text) {
                let (lt, lc) = split_dotted(&left);
                let (rt, rc) = split_dotted(&right);
                info.left_table = lt.or(info.left_table);
                info.right_table = rt.or(info.right_table);
                info.left_column = Some(lc);
                info.right_column = Some(rc);
            }
        }
        refs.joins.push(info);
    }

    // Columns: dotted identifiers the classifier does not place elsewhere.
    for matched in DOTTED_IDENT_RE.find_iter(sql) {
        let candidate = matched.as_str();
        if refs.contains_table(candidate) {
            continue;
        }
        match classify(candidate, sql) {
            IdentifierKind::Column | IdentifierKind::Unknown => {
                refs.columns.push(candidate.to_string())
            }
            _ => {}
        }
    }

    refs
}

fn join_type_from_keyword(keyword: &str) -> JoinType {
    let lower = keyword.to_lowercase();
    if lower.contains("left") {
        JoinType::Left
    } else if lower.contains("right") {
        JoinType::Right
    } else if lower.contains("full") {
        JoinType::Full
    } else if lower.contains("cross") {
        JoinType::Cross
    } else {
        JoinType::Inner
    }
}

/// The text between an ON keyword (searched from `from_offset`) and the next
/// clause boundary.
fn on_condition_slice(sql: &str, from_offset: usize) -> Option<String> {
    let on_match = ON_KEYWORD_RE.find_at(sql, from_offset)?;
    let condition_start = on_match.end();
    let condition_end = CLAUSE_BOUNDARY_RE
        .find_at(sql, condition_start)
        .map(|m| m.start())
        .unwrap_or(sql.len());
    if condition_end <= condition_start {
        return None;
    }
    Some(sql[condition_start..condition_end].to_string())
}

fn regex_equality_pair(condition: &str) -> Option<(Vec<String>, Vec<String>)> {
    let captures = EQ_PAIR_RE.captures(condition)?;
    let left = captures.get(1)?.as_str();
    let right = captures.get(2)?.as_str();
    Some((
        left.split('.').map(String::from).collect(),
        right.split('.').map(String::from).collect(),
    ))
}

fn split_dotted(parts: &[String]) -> (Option<String>, String) {
    let column = parts.last().cloned().unwrap_or_default();
    if parts.len() < 2 {
        return (None, column);
    }
    (Some(parts[..parts.len() - 1].join(".")), column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_part_names_kept_whole() {
        let refs = extract("SELECT x FROM a.b.c JOIN d.e.f ON a.b.c.id = d.e.f.ref_id");
        assert!(refs.contains_table("a.b.c"));
        assert!(refs.contains_table("d.e.f"));
        assert_eq!(refs.tables.len(), 2);

        assert_eq!(refs.joins.len(), 1);
        let join = &refs.joins[0];
        assert_eq!(join.left_table.as_deref(), Some("a.b.c"));
        assert_eq!(join.right_table.as_deref(), Some("d.e.f"));
        assert_eq!(join.left_column.as_deref(), Some("id"));
        assert_eq!(join.right_column.as_deref(), Some("ref_id"));
        assert_eq!(join.join_type, JoinType::Inner);
    }

    #[test]
    fn test_aliases_resolve_to_tables() {
        let refs = extract("SELECT o.amount FROM orders o LEFT JOIN customers c ON o.cid = c.id");
        assert!(refs.contains_table("orders"));
        assert!(refs.contains_table("customers"));
        let join = &refs.joins[0];
        assert_eq!(join.join_type, JoinType::Left);
        assert_eq!(join.left_table.as_deref(), Some("orders"));
        assert_eq!(join.right_table.as_deref(), Some("customers"));
    }

    #[test]
    fn test_cte_names_are_not_tables() {
        let refs = extract(
            "WITH recent AS (SELECT * FROM orders WHERE day > '2024-01-01') \
             SELECT * FROM recent",
        );
        assert!(refs.contains_table("orders"));
        assert!(!refs.contains_table("recent"));
    }

    #[test]
    fn test_backticked_qualified_name() {
        let refs = extract("SELECT * FROM `proj.dataset.events`");
        assert!(refs.contains_table("proj.dataset.events"));
    }

    #[test]
    fn test_tables_deduplicated_case_insensitively() {
        let refs = extract("SELECT a.x FROM t a JOIN T b ON a.x = b.x");
        assert_eq!(refs.tables.len(), 1);
    }

    #[test]
    fn test_malformed_sql_uses_fallback() {
        // Unbalanced parens defeat the parser; the scan still finds tables.
        let refs = extract("SELECT ((broken FROM orders JOIN customers ON orders.cid = customers.id");
        assert!(refs.contains_table("orders"));
        assert!(refs.contains_table("customers"));
        assert_eq!(refs.joins.len(), 1);
        assert_eq!(refs.joins[0].left_column.as_deref(), Some("cid"));
    }

    #[test]
    fn test_garbage_degrades_to_empty() {
        let refs = extract("this is not sql at all");
        assert!(refs.tables.is_empty());
        assert!(refs.joins.is_empty());
    }

    #[test]
    fn test_columns_collected_from_projection_and_where() {
        let refs = extract("SELECT name, price FROM products WHERE price > 10");
        assert!(refs.contains_column("name"));
        assert!(refs.contains_column("price"));
    }

    #[test]
    fn test_using_constraint() {
        let refs = extract("SELECT * FROM a JOIN b USING (id)");
        let join = &refs.joins[0];
        assert_eq!(join.left_column.as_deref(), Some("id"));
        assert_eq!(join.right_column.as_deref(), Some("id"));
        assert!(join.condition_text.contains("USING"));
    }
}
