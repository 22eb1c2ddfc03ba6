//! Lexical units produced by the lexer.

use serde::Serialize;

/// A lexeme is a raw slice of the query with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme<'a> {
    pub kind: LexemeKind<'a>,
    pub span: Span,
}

/// The kind of a lexeme.
#[derive(Debug, Clone, PartialEq)]
pub enum LexemeKind<'a> {
    /// A run of whitespace
    Spaces(&'a str),
    /// A run of non-whitespace characters, possibly containing quoted,
    /// bracketed or function-call segments
    Word(&'a str),
    /// A word consisting of exactly one quoted string, quotes included
    Quoted(&'a str),
    LParen, // (
    RParen, // )
}

impl<'a> LexemeKind<'a> {
    /// The slice of input this lexeme covers.
    pub fn text(&self) -> &'a str {
        match self {
            LexemeKind::Spaces(s) | LexemeKind::Word(s) | LexemeKind::Quoted(s) => s,
            LexemeKind::LParen => "(",
            LexemeKind::RParen => ")",
        }
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset (exclusive).
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// A zero-width span at `offset`.
    pub fn empty(offset: usize) -> Self {
        Self::new(offset, offset)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Shift both ends by `offset` bytes.
    pub fn offset(self, offset: usize) -> Self {
        Self::new(self.start + offset, self.end + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_helpers() {
        let span = Span::new(2, 6);
        assert_eq!(span.len(), 4);
        assert!(!span.is_empty());
        assert_eq!(span.offset(10), Span::new(12, 16));
        assert!(Span::empty(3).is_empty());
    }

    #[test]
    fn test_lexeme_text() {
        assert_eq!(LexemeKind::Word("a:b").text(), "a:b");
        assert_eq!(LexemeKind::LParen.text(), "(");
        assert_eq!(LexemeKind::RParen.text(), ")");
    }
}
