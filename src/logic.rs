//! Boolean structure of a parsed query.
//!
//! The token sequence keeps connectors in source order. This module builds
//! the precedence-aware expression from it:
//!
//! 1. **Groups** `( ... )` bind tightest
//! 2. **AND**, explicit or implicit
//! 3. **OR** binds loosest
//!
//! so `a b OR c` reads as `(a AND b) OR c`.

use crate::ast::{Token, TokenKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LogicTree<'t> {
    And(Vec<LogicTree<'t>>),
    Or(Vec<LogicTree<'t>>),
    /// A filter or free-text token
    Term(&'t Token),
}

impl<'t> LogicTree<'t> {
    /// Build the expression for `tokens`. Returns `None` when there are no
    /// terms, e.g. for an empty query or `()`.
    ///
    /// Groups are built recursively; parser output is bounded by the
    /// configured nesting limit.
    pub fn build(tokens: &'t [Token]) -> Option<Self> {
        parse_or(tokens)
    }

    /// Every term, left to right.
    pub fn terms(&self) -> Vec<&'t Token> {
        let mut terms = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                LogicTree::Term(token) => terms.push(*token),
                LogicTree::And(children) | LogicTree::Or(children) => {
                    pending.extend(children.iter().rev())
                }
            }
        }
        terms
    }
}

/// `and_segment (OR and_segment)*`
fn parse_or(tokens: &[Token]) -> Option<LogicTree<'_>> {
    let branches: Vec<_> = tokens
        .split(|t| matches!(t.kind, TokenKind::LogicOr))
        .filter_map(parse_and)
        .collect();
    collapse(branches, LogicTree::Or)
}

/// `term (AND? term)*`. Connectors are positional, so dangling or repeated
/// `AND`s contribute nothing.
fn parse_and(tokens: &[Token]) -> Option<LogicTree<'_>> {
    let terms: Vec<_> = tokens
        .iter()
        .filter_map(|token| match &token.kind {
            TokenKind::FreeText { .. } | TokenKind::Filter(_) => Some(LogicTree::Term(token)),
            TokenKind::LogicGroup { inner } => parse_or(inner),
            _ => None,
        })
        .collect();
    collapse(terms, LogicTree::And)
}

fn collapse<'t>(
    mut nodes: Vec<LogicTree<'t>>,
    combine: fn(Vec<LogicTree<'t>>) -> LogicTree<'t>,
) -> Option<LogicTree<'t>> {
    match nodes.len() {
        0 => None,
        1 => nodes.pop(),
        _ => Some(combine(nodes)),
    }
}

impl fmt::Display for LogicTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (children, separator) = match self {
            LogicTree::Term(token) => return f.write_str(&token.text),
            LogicTree::And(children) => (children, " AND "),
            LogicTree::Or(children) => (children, " OR "),
        };
        f.write_str("(")?;
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(separator)?;
            }
            write!(f, "{child}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_search;

    fn render(input: &str) -> Option<String> {
        let tokens = parse_search(input).unwrap();
        LogicTree::build(&tokens).map(|tree| tree.to_string())
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert_eq!(render("a:1 b:2 OR c:3").as_deref(), Some("((a:1 AND b:2) OR c:3)"));
        assert_eq!(render("a:1 OR b:2 AND c:3").as_deref(), Some("(a:1 OR (b:2 AND c:3))"));
    }

    #[test]
    fn test_groups_bind_tightest() {
        assert_eq!(
            render("(a OR b) AND c").as_deref(),
            Some("((a OR b) AND c)")
        );
    }

    #[test]
    fn test_single_term_collapses() {
        assert_eq!(render("((a:1))").as_deref(), Some("a:1"));
        let tokens = parse_search("a:1").unwrap();
        assert_eq!(LogicTree::build(&tokens), Some(LogicTree::Term(&tokens[0])));
    }

    #[test]
    fn test_empty_inputs() {
        assert_eq!(render(""), None);
        assert_eq!(render("   "), None);
        assert_eq!(render("()"), None);
        assert_eq!(render("OR AND"), None);
    }

    #[test]
    fn test_dangling_connectors_are_ignored() {
        assert_eq!(render("OR a:1 OR").as_deref(), Some("a:1"));
        assert_eq!(render("a:1 AND AND b:2").as_deref(), Some("(a:1 AND b:2)"));
        assert_eq!(render("a:1 () b:2").as_deref(), Some("(a:1 AND b:2)"));
    }

    #[test]
    fn test_terms_in_source_order() {
        let tokens = parse_search("x:1 (y:2 OR z:3) w").unwrap();
        let tree = LogicTree::build(&tokens).unwrap();
        let texts: Vec<_> = tree.terms().into_iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["x:1", "y:2", "z:3", "w"]);
    }
}
