//! Parser for search queries.
//!
//! ## Parse flow
//!
//! ```text
//! parse()
//!   └─ for each lexeme (left to right)
//!        ├─ Spaces   → Spaces token (or absorbed by free-text coalescing)
//!        ├─ "("      → push group frame (fatal past max_depth)
//!        ├─ ")"      → pop frame into LogicGroup (fatal if no frame is open)
//!        ├─ Quoted   → quoted FreeText term
//!        └─ Word
//!             ├─ AND / OR        → LogicAnd / LogicOr (bounded by whitespace,
//!             │                    a parenthesis or either end of the input)
//!             ├─ key:value       → Filter term (grammar::parse_filter)
//!             └─ anything else   → FreeText term
//!
//! term pushed after another term with no connector between
//!   → zero-width implicit LogicAnd first
//! ```
//!
//! The frame stack replaces recursion, so nesting depth is bounded only by
//! `SearchConfig::max_depth`. Precedence between `AND` and `OR` is not encoded
//! in the flat token sequence; [`LogicTree`](crate::logic::LogicTree) builds it.

use crate::ast::{ConfigRef, ParseResult, Token, TokenKind};
use crate::config::SearchConfig;
use crate::error::ParseError;
use crate::grammar;
use crate::lexer::Lexer;
use crate::token::{Lexeme, LexemeKind, Span};
use std::sync::Arc;
use tracing::{debug, trace};

pub struct Parser<'a> {
    input: &'a str,
    config: ConfigRef,
}

/// An open group awaiting its closing parenthesis.
struct Frame {
    open: Span,
    items: Vec<Token>,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str, config: Arc<SearchConfig>) -> Self {
        Parser {
            input,
            config: ConfigRef(config),
        }
    }

    pub fn parse(&self) -> Result<ParseResult, ParseError> {
        match self.parse_tokens() {
            Ok(tokens) => {
                debug!(
                    query_len = self.input.len(),
                    tokens = tokens.len(),
                    "parsed search query"
                );
                Ok(tokens)
            }
            Err(err) => {
                debug!(error = %err, "search query failed to parse");
                Err(err)
            }
        }
    }

    fn parse_tokens(&self) -> Result<ParseResult, ParseError> {
        let mut root = Vec::new();
        let mut groups: Vec<Frame> = Vec::new();

        for lexeme in Lexer::with_grouping(self.input, self.config.allow_paren_grouping) {
            let Lexeme { kind, span } = lexeme?;
            trace!(?kind, start = span.start, end = span.end, "lexeme");

            match kind {
                LexemeKind::Spaces(text) => {
                    current(&mut root, &mut groups).push(self.token(TokenKind::Spaces, span, text));
                }
                LexemeKind::LParen => {
                    if groups.len() >= self.config.max_depth {
                        return Err(ParseError::NestingTooDeep {
                            limit: self.config.max_depth,
                            offset: span.start,
                        });
                    }
                    groups.push(Frame {
                        open: span,
                        items: Vec::new(),
                    });
                }
                LexemeKind::RParen => {
                    let frame = groups
                        .pop()
                        .ok_or(ParseError::UnexpectedCloseParen { offset: span.start })?;
                    let location = Span::new(frame.open.start, span.end);
                    let group = self.token(
                        TokenKind::LogicGroup { inner: frame.items },
                        location,
                        &self.input[location.start..location.end],
                    );
                    push_term(current(&mut root, &mut groups), group);
                }
                LexemeKind::Quoted(text) => {
                    let value = grammar::unquote(text).unwrap_or_else(|| text.to_string());
                    let token = self.token(TokenKind::FreeText { value, quoted: true }, span, text);
                    push_term(current(&mut root, &mut groups), token);
                }
                LexemeKind::Word(text) => {
                    let items = current(&mut root, &mut groups);
                    self.push_word(items, text, span);
                }
            }
        }

        if let Some(frame) = groups.first() {
            return Err(ParseError::UnclosedGroup {
                offset: frame.open.start,
            });
        }
        if self.config.require_terms && !contains_term(&root) {
            return Err(ParseError::EmptyQuery);
        }
        Ok(root)
    }

    fn push_word(&self, items: &mut Vec<Token>, text: &str, span: Span) {
        if self.config.allow_boolean_operators && self.is_standalone(span) {
            let keyword = if text.eq_ignore_ascii_case("AND") {
                Some(TokenKind::LogicAnd { implicit: false })
            } else if text.eq_ignore_ascii_case("OR") {
                Some(TokenKind::LogicOr)
            } else {
                None
            };
            if let Some(kind) = keyword {
                items.push(self.token(kind, span, text));
                return;
            }
        }

        if let Some(filter) = grammar::parse_filter(text, span.start, &self.config) {
            if let Some(invalid) = filter.as_filter().and_then(|f| f.invalid.as_ref()) {
                debug!(
                    filter = text,
                    reason = %invalid.reason,
                    message = %invalid.message,
                    "invalid filter"
                );
            }
            push_term(items, filter);
            return;
        }

        if self.config.coalesce_free_text && self.coalesce(items, span) {
            return;
        }
        let token = self.token(
            TokenKind::FreeText {
                value: text.to_string(),
                quoted: false,
            },
            span,
            text,
        );
        push_term(items, token);
    }

    /// Merge `text` into a preceding unquoted free-text token, absorbing the
    /// whitespace between them. Returns false when there is nothing to merge into.
    fn coalesce(&self, items: &mut Vec<Token>, span: Span) -> bool {
        let [.., previous, spaces] = items.as_mut_slice() else {
            return false;
        };
        if !matches!(spaces.kind, TokenKind::Spaces)
            || !matches!(previous.kind, TokenKind::FreeText { quoted: false, .. })
        {
            return false;
        }

        let location = Span::new(previous.location.start, span.end);
        let merged = &self.input[location.start..location.end];
        previous.kind = TokenKind::FreeText {
            value: merged.to_string(),
            quoted: false,
        };
        previous.location = location;
        previous.text = merged.to_string();
        items.pop();
        true
    }

    /// Whether the word at `span` is delimited by whitespace, a grouping
    /// parenthesis or the ends of the input on both sides.
    fn is_standalone(&self, span: Span) -> bool {
        let grouping = self.config.allow_paren_grouping;
        let delimits = |c: char| c.is_whitespace() || (grouping && (c == '(' || c == ')'));
        let before = self.input[..span.start].chars().next_back();
        let after = self.input[span.end..].chars().next();
        before.map_or(true, delimits) && after.map_or(true, delimits)
    }

    fn token(&self, kind: TokenKind, location: Span, text: &str) -> Token {
        Token::new(kind, location, text, self.config.clone())
    }
}

/// The item list of the innermost open group, or the root sequence.
fn current<'s>(root: &'s mut Vec<Token>, groups: &'s mut [Frame]) -> &'s mut Vec<Token> {
    match groups.last_mut() {
        Some(frame) => &mut frame.items,
        None => root,
    }
}

/// Push a term, first inserting an implicit AND when it directly follows
/// another term.
fn push_term(items: &mut Vec<Token>, term: Token) {
    let follows_term = items
        .iter()
        .rev()
        .find(|t| !matches!(t.kind, TokenKind::Spaces))
        .is_some_and(Token::is_term);
    if follows_term {
        items.push(Token::new(
            TokenKind::LogicAnd { implicit: true },
            Span::empty(term.location.start),
            "",
            term.config.clone(),
        ));
    }
    items.push(term);
}

/// Whether the tree holds any filter or free text.
fn contains_term(tokens: &[Token]) -> bool {
    let mut pending: Vec<&Token> = tokens.iter().collect();
    while let Some(token) = pending.pop() {
        match &token.kind {
            TokenKind::FreeText { .. } | TokenKind::Filter(_) => return true,
            TokenKind::LogicGroup { inner } => pending.extend(inner),
            _ => {}
        }
    }
    false
}
