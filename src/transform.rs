//! Post-order rewriting of token trees.
//!
//! The walk keeps its own stack of frames, so arbitrarily deep trees are
//! rewritten without growing the call stack.

use crate::ast::{Filter, Token, TokenKind};

/// One token being rebuilt: the original node, its children still to visit,
/// and the already transformed children.
struct Frame<'t> {
    /// `None` for the synthetic root holding the top-level sequence
    node: Option<&'t Token>,
    children: Vec<&'t Token>,
    next: usize,
    done: Vec<Token>,
}

impl<'t> Frame<'t> {
    fn enter(node: Option<&'t Token>, children: Vec<&'t Token>) -> Self {
        Frame {
            node,
            done: Vec::with_capacity(children.len()),
            children,
            next: 0,
        }
    }
}

/// Rebuild `tokens` depth-first, post-order.
///
/// `transform` receives every token, nested ones included, after its
/// children (group contents, filter key and value, list items) have been
/// transformed and reattached, and returns its replacement. The input is
/// left untouched.
///
/// ```
/// use search_syntax::{parse_search, tree_transformer};
///
/// let tokens = parse_search("a:1 (b:2)").unwrap();
/// let same = tree_transformer(&tokens, |token| token);
/// assert_eq!(same, tokens);
/// ```
pub fn tree_transformer<F>(tokens: &[Token], mut transform: F) -> Vec<Token>
where
    F: FnMut(Token) -> Token,
{
    let mut stack = vec![Frame::enter(None, tokens.iter().collect())];

    while let Some(mut frame) = stack.pop() {
        if let Some(&child) = frame.children.get(frame.next) {
            frame.next += 1;
            stack.push(frame);
            stack.push(Frame::enter(Some(child), children_of(child)));
            continue;
        }

        let Some(node) = frame.node else {
            return frame.done;
        };
        let rebuilt = transform(reattach(node, frame.done));
        if let Some(parent) = stack.last_mut() {
            parent.done.push(rebuilt);
        }
    }
    Vec::new()
}

fn children_of(token: &Token) -> Vec<&Token> {
    match &token.kind {
        TokenKind::LogicGroup { inner } => inner.iter().collect(),
        TokenKind::Filter(filter) => vec![&filter.key, &filter.value],
        TokenKind::ValueNumberList { items } | TokenKind::ValueTextList { items } => {
            items.iter().collect()
        }
        _ => Vec::new(),
    }
}

/// Copy `node` with its children replaced by `children`.
fn reattach(node: &Token, children: Vec<Token>) -> Token {
    let kind = match &node.kind {
        TokenKind::LogicGroup { .. } => TokenKind::LogicGroup { inner: children },
        TokenKind::ValueNumberList { .. } => TokenKind::ValueNumberList { items: children },
        TokenKind::ValueTextList { .. } => TokenKind::ValueTextList { items: children },
        TokenKind::Filter(filter) => match <[Token; 2]>::try_from(children) {
            Ok([key, value]) => TokenKind::Filter(Box::new(Filter {
                filter_type: filter.filter_type,
                negated: filter.negated,
                key,
                operator: filter.operator,
                value,
                invalid: filter.invalid.clone(),
            })),
            Err(_) => TokenKind::Filter(filter.clone()),
        },
        leaf => leaf.clone(),
    };
    Token {
        kind,
        location: node.location,
        text: node.text.clone(),
        config: node.config.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::collect_filters;
    use crate::config::SearchConfig;
    use crate::parser::Parser;
    use crate::parse_search;
    use crate::token::Span;
    use std::sync::Arc;

    fn max_location_end(tokens: &[Token]) -> usize {
        let mut max = 0;
        tree_transformer(tokens, |token| {
            max = max.max(token.location.end);
            token
        });
        max
    }

    #[test]
    fn test_identity_is_structurally_equal() {
        let tokens =
            parse_search(r#"!a:b (c:[1,2] OR "d e") created:>2021-01-01 f g"#).unwrap();
        assert_eq!(tree_transformer(&tokens, |t| t), tokens);
    }

    #[test]
    fn test_strip_locations() {
        let tokens = parse_search("a:1 (b:[x, y] (c))").unwrap();
        let stripped = tree_transformer(&tokens, |mut token| {
            token.location = Span::default();
            token
        });

        assert_eq!(max_location_end(&stripped), 0);
        // The original tree is untouched
        assert!(max_location_end(&tokens) > 0);
    }

    #[test]
    fn test_children_before_parents() {
        let tokens = parse_search("(a:1 b)").unwrap();
        let mut visited = Vec::new();
        tree_transformer(&tokens, |token| {
            visited.push(token.text.clone());
            token
        });
        assert_eq!(visited, vec!["a", "1", "a:1", " ", "", "b", "(a:1 b)"]);
    }

    #[test]
    fn test_children_are_reattached() {
        let tokens = parse_search("a:x b:y").unwrap();
        let renamed = tree_transformer(&tokens, |mut token| {
            if let TokenKind::ValueText { value, .. } = &mut token.kind {
                *value = value.to_uppercase();
            }
            token
        });

        let values: Vec<_> = collect_filters(&renamed)
            .into_iter()
            .map(|f| match &f.value.kind {
                TokenKind::ValueText { value, .. } => value.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(values, vec!["X", "Y"]);
    }

    #[test]
    fn test_replace_filters_with_free_text() {
        let tokens = parse_search("a:1 b").unwrap();
        let replaced = tree_transformer(&tokens, |token| match token.kind {
            TokenKind::Filter(_) => Token {
                kind: TokenKind::FreeText {
                    value: token.text.clone(),
                    quoted: false,
                },
                ..token
            },
            _ => token,
        });
        assert!(collect_filters(&replaced).is_empty());
        assert_eq!(replaced.len(), tokens.len());
    }

    #[test]
    fn test_deep_nesting() {
        let depth = 500;
        let input = format!("{}a{}", "(".repeat(depth), ")".repeat(depth));
        let config = SearchConfig {
            max_depth: depth,
            ..Default::default()
        };
        let tokens = Parser::new(&input, Arc::new(config)).parse().unwrap();

        let mut groups = 0;
        let rebuilt = tree_transformer(&tokens, |token| {
            if matches!(token.kind, TokenKind::LogicGroup { .. }) {
                groups += 1;
            }
            token
        });
        assert_eq!(groups, depth);
        assert_eq!(rebuilt, tokens);
    }

    #[test]
    fn test_empty_input() {
        assert!(tree_transformer(&[], |t| t).is_empty());
    }
}
