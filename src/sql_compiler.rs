//! SQL compiler that lowers a parsed search query to a `SELECT` using sea-query.
//!
//! The boolean structure comes from [`LogicTree`]; every term becomes one
//! `WHERE` predicate:
//!
//! | term                    | predicate                                   |
//! |-------------------------|---------------------------------------------|
//! | free text               | `free_text_column LIKE '%text%' ESCAPE '!'` |
//! | `key:value`             | `column = 'value'` (`*` → `LIKE`)           |
//! | `key:[a,b]`             | `column IN (a, b)`                          |
//! | `key:>15m`              | `column > 900000` (durations in ms)         |
//! | `key:>10kb`             | `column > 10000` (sizes in bytes)           |
//! | `key:-24h`              | `column >= now - 24h`                       |
//! | `has:key`               | `column IS NOT NULL`                        |
//! | `is:value`              | `status_column = 'value'`                   |
//! | `!…`                    | `NOT (…)`                                   |

use crate::ast::{
    Filter, FilterType, InvalidReason, Sign, TermOperator, Token, TokenKind,
};
use crate::logic::LogicTree;
use crate::token::Span;
use chrono::{DateTime, TimeDelta, Utc};
use sea_query::{
    Asterisk, Expr, Iden, LikeExpr, PostgresQueryBuilder, SelectStatement, SimpleExpr, Value,
};
use std::collections::HashMap;
use tracing::debug;

/// Configuration for SQL optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Minimum number of OR'ed equality filters on one key before they are
    /// rewritten to a single IN clause
    pub max_or_conditions_for_in: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_or_conditions_for_in: 5,
        }
    }
}

/// Compiler configuration
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub table_name: String,
    /// Search key to column name. Unmapped keys are used as column names.
    pub column_mapping: HashMap<String, String>,
    /// Column free-text terms are matched against
    pub free_text_column: String,
    /// Column `is:` filters compare against
    pub status_column: String,
    /// Reference instant for relative dates; the current time when unset
    pub now: Option<DateTime<Utc>>,
    pub optimization_config: OptimizationConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            table_name: "events".to_string(),
            column_mapping: HashMap::new(),
            free_text_column: "message".to_string(),
            status_column: "status".to_string(),
            now: None,
            optimization_config: OptimizationConfig::default(),
        }
    }
}

/// Table identifier wrapper
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("cannot compile invalid filter `{text}` ({reason}): {message}")]
    InvalidFilter {
        text: String,
        reason: InvalidReason,
        message: String,
        span: Span,
    },

    #[error("key `{key}` does not map to a column")]
    UnsupportedKey { key: String, span: Span },
}

/// Represents an optimization applied during compilation
#[derive(Debug, Clone, PartialEq)]
pub enum Optimization {
    OrToIn { field: String, value_count: usize },
}

/// Result of SQL compilation with optimization information
#[derive(Debug)]
pub struct CompileResult {
    pub sql: String,
    pub optimizations: Vec<Optimization>,
}

/// SQL Compiler that converts parsed search queries to SQL
pub struct SqlCompiler {
    config: CompilerConfig,
}

impl Default for SqlCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlCompiler {
    pub fn new() -> Self {
        Self::from_config(CompilerConfig::default())
    }

    pub fn from_config(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Set column mapping for search keys
    pub fn set_column_mapping(&mut self, mapping: HashMap<String, String>) {
        self.config.column_mapping = mapping;
    }

    fn column_name(&self, field: &str) -> ColumnName {
        ColumnName(
            self.config
                .column_mapping
                .get(field)
                .cloned()
                .unwrap_or_else(|| field.to_string()),
        )
    }

    /// Compile a parse result into SQL
    pub fn compile(&self, tokens: &[Token]) -> Result<CompileResult, CompileError> {
        let mut optimizations = Vec::new();

        let mut select = SelectStatement::new();
        select.from(TableName(self.config.table_name.clone()));
        select.column(Asterisk);

        if let Some(tree) = LogicTree::build(tokens) {
            let condition = self.compile_tree(&tree, &mut optimizations)?;
            select.and_where(condition);
        }

        let sql = select.to_string(PostgresQueryBuilder);
        debug!(sql = %sql, optimizations = optimizations.len(), "compiled search query");

        Ok(CompileResult { sql, optimizations })
    }

    fn compile_tree(
        &self,
        tree: &LogicTree<'_>,
        optimizations: &mut Vec<Optimization>,
    ) -> Result<SimpleExpr, CompileError> {
        match tree {
            LogicTree::Term(token) => self.compile_term(token),
            LogicTree::And(children) => {
                let exprs = children
                    .iter()
                    .map(|child| self.compile_tree(child, optimizations))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(combine(exprs, SimpleExpr::and))
            }
            LogicTree::Or(children) => {
                if let Some((in_expr, optimization)) = self.try_optimize_or_to_in(tree) {
                    optimizations.push(optimization);
                    return Ok(in_expr);
                }
                let exprs = children
                    .iter()
                    .map(|child| self.compile_tree(child, optimizations))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(combine(exprs, SimpleExpr::or))
            }
        }
    }

    fn compile_term(&self, token: &Token) -> Result<SimpleExpr, CompileError> {
        match &token.kind {
            TokenKind::FreeText { value, .. } => Ok(Expr::col(ColumnName(
                self.config.free_text_column.clone(),
            ))
            .like(like_pattern(&format!("%{}%", escape_like(value))))),
            TokenKind::Filter(filter) => {
                if let Some(invalid) = &filter.invalid {
                    return Err(CompileError::InvalidFilter {
                        text: token.text.clone(),
                        reason: invalid.reason,
                        message: invalid.message.clone(),
                        span: token.location,
                    });
                }
                let expr = self.compile_filter(filter)?;
                Ok(if filter.negated { expr.not() } else { expr })
            }
            _ => Ok(Expr::val(true).into()),
        }
    }

    fn compile_filter(&self, filter: &Filter) -> Result<SimpleExpr, CompileError> {
        let value = &filter.value.kind;

        if filter.filter_type == FilterType::Is {
            let column = ColumnName(self.config.status_column.clone());
            return Ok(compare(column, filter.operator, string_value(&filter.value.text)));
        }

        if filter.filter_type == FilterType::Has {
            return Ok(Expr::col(self.column_name(&filter.value.text)).is_not_null());
        }

        let column = match &filter.key.kind {
            TokenKind::KeySimple { value, .. } | TokenKind::KeyExplicitTag { value } => {
                self.column_name(value)
            }
            _ => {
                return Err(CompileError::UnsupportedKey {
                    key: filter.key.text.clone(),
                    span: filter.key.location,
                })
            }
        };

        let expr = match value {
            TokenKind::ValueText { value, .. } => text_comparison(column, filter.operator, value),
            TokenKind::ValueNumberList { items } | TokenKind::ValueTextList { items } => {
                let values: Vec<Value> = items.iter().filter_map(|item| scalar_value(&item.kind)).collect();
                if filter.operator == TermOperator::NotEqual {
                    Expr::col(column).is_not_in(values)
                } else {
                    Expr::col(column).is_in(values)
                }
            }
            TokenKind::ValueRelativeDate { value, sign, unit } => {
                let now = self.config.now.unwrap_or_else(Utc::now);
                let millis = (*value as f64 * unit.millis()) as i64;
                let instant = TimeDelta::try_milliseconds(millis)
                    .and_then(|delta| now.checked_sub_signed(delta))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                // `-24h` is newer than 24 hours ago, `+24h` older
                let operator = match (filter.operator, sign) {
                    (TermOperator::Default, Sign::Minus) => TermOperator::GreaterThanEqual,
                    (TermOperator::Default, Sign::Plus) => TermOperator::LessThanEqual,
                    (operator, _) => operator,
                };
                compare(column, operator, string_value(&instant.to_rfc3339()))
            }
            other => match scalar_value(other) {
                Some(value) => compare(column, filter.operator, value),
                None => Expr::val(true).into(),
            },
        };
        Ok(expr)
    }

    /// Try to optimize OR'ed equality filters on one key into an IN clause
    fn try_optimize_or_to_in(&self, tree: &LogicTree<'_>) -> Option<(SimpleExpr, Optimization)> {
        let mut field = None;
        let mut values = Vec::new();
        if !collect_equality_values(tree, &mut field, &mut values) {
            return None;
        }
        let field = field?;
        if values.len() < self.config.optimization_config.max_or_conditions_for_in {
            return None;
        }

        let optimization = Optimization::OrToIn {
            field: field.to_string(),
            value_count: values.len(),
        };
        let in_values: Vec<Value> = values.into_iter().map(string_value).collect();
        Some((Expr::col(self.column_name(field)).is_in(in_values), optimization))
    }
}

/// Collect the values of an OR of plain `key:value` text filters that all
/// share one key. Returns false as soon as anything else shows up.
fn collect_equality_values<'t>(
    tree: &LogicTree<'t>,
    field: &mut Option<&'t str>,
    values: &mut Vec<&'t str>,
) -> bool {
    match tree {
        LogicTree::Or(children) => children
            .iter()
            .all(|child| collect_equality_values(child, field, values)),
        LogicTree::Term(token) => {
            let Some(filter) = token.as_filter() else {
                return false;
            };
            let plain = filter.filter_type == FilterType::Text
                && !filter.negated
                && filter.invalid.is_none()
                && matches!(filter.operator, TermOperator::Default | TermOperator::Equal)
                && matches!(filter.key.kind, TokenKind::KeySimple { .. });
            let (true, Some(key), TokenKind::ValueText { value, .. }) =
                (plain, filter.key.key_name(), &filter.value.kind)
            else {
                return false;
            };
            if value.contains('*') || field.is_some_and(|f| f != key) {
                return false;
            }
            *field = Some(key);
            values.push(value);
            true
        }
        LogicTree::And(_) => false,
    }
}

/// Combine multiple conditions; an empty set matches everything
fn combine(exprs: Vec<SimpleExpr>, op: fn(SimpleExpr, SimpleExpr) -> SimpleExpr) -> SimpleExpr {
    exprs
        .into_iter()
        .reduce(op)
        .unwrap_or_else(|| Expr::val(true).into())
}

fn compare(column: ColumnName, operator: TermOperator, value: Value) -> SimpleExpr {
    let col = Expr::col(column);
    match operator {
        TermOperator::Default | TermOperator::Equal => col.eq(value),
        TermOperator::NotEqual => col.ne(value),
        TermOperator::GreaterThan => col.gt(value),
        TermOperator::GreaterThanEqual => col.gte(value),
        TermOperator::LessThan => col.lt(value),
        TermOperator::LessThanEqual => col.lte(value),
    }
}

/// Text equality; `*` is a wildcard.
fn text_comparison(column: ColumnName, operator: TermOperator, value: &str) -> SimpleExpr {
    if !value.contains('*') {
        return compare(column, operator, string_value(value));
    }
    let pattern = like_pattern(&escape_like(value).replace('*', "%"));
    if operator == TermOperator::NotEqual {
        Expr::col(column).not_like(pattern)
    } else {
        Expr::col(column).like(pattern)
    }
}

const LIKE_ESCAPE: char = '!';

/// Escape the `LIKE` metacharacters of user text.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

fn like_pattern(pattern: &str) -> LikeExpr {
    LikeExpr::new(pattern).escape(LIKE_ESCAPE)
}

fn string_value(s: &str) -> Value {
    Value::String(Some(Box::new(s.to_string())))
}

/// Normalize a scalar value token: durations to milliseconds, sizes to bytes,
/// dates to RFC 3339.
fn scalar_value(kind: &TokenKind) -> Option<Value> {
    let value = match kind {
        TokenKind::ValueText { value, .. } => string_value(value),
        TokenKind::ValueNumber { value, unit } => {
            Value::Double(Some(value * unit.map_or(1.0, |u| u.multiplier())))
        }
        TokenKind::ValueDuration { value, unit } => Value::Double(Some(value * unit.millis())),
        TokenKind::ValueSize { value, unit } => Value::Double(Some(value * unit.bytes())),
        TokenKind::ValueBoolean { value } => Value::Bool(Some(*value)),
        TokenKind::ValueIso8601Date { value } => string_value(&value.to_rfc3339()),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_search;
    use chrono::TimeZone;

    fn create_test_compiler() -> SqlCompiler {
        let mut compiler = SqlCompiler::from_config(CompilerConfig {
            now: Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()),
            ..Default::default()
        });
        let mut mapping = HashMap::new();
        mapping.insert("transaction.duration".to_string(), "duration_ms".to_string());
        mapping.insert("user.email".to_string(), "email".to_string());
        compiler.set_column_mapping(mapping);
        compiler
    }

    fn compile(input: &str) -> CompileResult {
        let tokens = parse_search(input).unwrap();
        create_test_compiler().compile(&tokens).unwrap()
    }

    #[test]
    fn test_simple_filter_compilation() {
        let result = compile("browser:firefox");
        assert!(result.sql.starts_with(r#"SELECT * FROM "events""#));
        assert!(result.sql.contains(r#""browser" = 'firefox'"#));
        assert!(result.optimizations.is_empty());
    }

    #[test]
    fn test_empty_query_has_no_where() {
        let result = compile("   ");
        assert_eq!(result.sql, r#"SELECT * FROM "events""#);
    }

    #[test]
    fn test_duration_in_milliseconds() {
        let result = compile("transaction.duration:>15m");
        assert!(result.sql.contains(r#""duration_ms" > 900000"#));
    }

    #[test]
    fn test_free_text_and_implicit_and() {
        let result = compile("user.email:a@b.c timeout error");
        assert!(result.sql.contains(r#""email" = 'a@b.c'"#));
        assert!(result.sql.contains(r#""message" LIKE '%timeout error%'"#));
        assert!(result.sql.contains(" AND "));
    }

    #[test]
    fn test_or_and_negation() {
        let result = compile("!os:linux OR has:user.email");
        assert!(result.sql.contains("NOT"));
        assert!(result.sql.contains(" OR "));
        assert!(result.sql.contains(r#""email" IS NOT NULL"#));
    }

    #[test]
    fn test_lists_and_wildcards() {
        let result = compile("os:[linux, mac] !project_id:[1,2] url:*/api/*");
        assert!(result.sql.contains(r#""os" IN ('linux', 'mac')"#));
        assert!(result.sql.contains(r#""project_id" IN (1, 2)"#));
        assert!(result.sql.contains(r#""url" LIKE '%/api/%'"#));
    }

    #[test]
    fn test_like_metacharacters_are_escaped() {
        let result = compile("100%");
        assert!(result.sql.contains(r#""message" LIKE '%100!%%' ESCAPE '!'"#));

        let result = compile("url:*a_b!*");
        assert!(result.sql.contains(r#""url" LIKE '%a!_b!!%' ESCAPE '!'"#));
    }

    #[test]
    fn test_is_and_relative_date() {
        let result = compile("is:unresolved first_seen:-24h");
        assert!(result.sql.contains(r#""status" = 'unresolved'"#));
        assert!(result.sql.contains(r#""first_seen" >= '2024-01-01T00:00:00+00:00'"#));
    }

    #[test]
    fn test_or_to_in_optimization() {
        let compiler = SqlCompiler::from_config(CompilerConfig {
            optimization_config: OptimizationConfig {
                max_or_conditions_for_in: 2,
            },
            ..Default::default()
        });

        let tokens = parse_search("level:error OR level:fatal OR (level:warning)").unwrap();
        let result = compiler.compile(&tokens).unwrap();

        assert_eq!(
            result.optimizations,
            vec![Optimization::OrToIn {
                field: "level".to_string(),
                value_count: 3
            }]
        );
        assert!(result.sql.contains(r#""level" IN ('error', 'fatal', 'warning')"#));
    }

    #[test]
    fn test_or_on_mixed_keys_is_not_optimized() {
        let compiler = SqlCompiler::from_config(CompilerConfig {
            optimization_config: OptimizationConfig {
                max_or_conditions_for_in: 2,
            },
            ..Default::default()
        });
        let tokens = parse_search("level:error OR os:linux").unwrap();
        let result = compiler.compile(&tokens).unwrap();
        assert!(result.optimizations.is_empty());
        assert!(result.sql.contains(" OR "));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let tokens = parse_search("a:1 created:not-a-date").unwrap();
        let err = create_test_compiler().compile(&tokens).unwrap_err();
        match err {
            CompileError::InvalidFilter { reason, span, .. } => {
                assert_eq!(reason, InvalidReason::InvalidDate);
                assert_eq!(span, Span::new(4, 22));
            }
            other => panic!("Expected InvalidFilter, got {other:?}"),
        }
    }

    #[test]
    fn test_aggregate_key_is_unsupported() {
        let tokens = parse_search("count():>10").unwrap();
        let err = create_test_compiler().compile(&tokens).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedKey { ref key, .. } if key == "count()"));
    }
}
