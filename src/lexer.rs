//! Lexer for search queries.
//!
//! Splits the raw query into whitespace runs, words, standalone quoted
//! strings and parentheses. Words are deliberately coarse: `key:"a b"`,
//! `key:[a, b]` and `count():>5` each come out as a single word so the grammar
//! can classify them as a whole. Any other parenthesis is a standalone lexeme.

use crate::error::ParseError;
use crate::token::{Lexeme, LexemeKind, Span};

pub struct Lexer<'a> {
    input: &'a str,
    /// Current byte offset into `input`
    position: usize,
    /// Whether parentheses are grouping characters or plain text
    grouping: bool,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_grouping(input, true)
    }

    pub fn with_grouping(input: &'a str, grouping: bool) -> Self {
        Lexer {
            input,
            position: 0,
            grouping,
            failed: false,
        }
    }

    /// Collect every lexeme, stopping at the first fatal error.
    pub fn tokenize(self) -> Result<Vec<Lexeme<'a>>, ParseError> {
        self.collect()
    }

    /// Returns the character at the current position without advancing.
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// Advances one character and returns it.
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn is_paren(&self, c: char) -> bool {
        self.grouping && (c == '(' || c == ')')
    }

    fn lexeme(&self, kind: LexemeKind<'a>, start: usize) -> Lexeme<'a> {
        Lexeme {
            kind,
            span: Span::new(start, self.position),
        }
    }

    fn read_spaces(&mut self, start: usize) -> Lexeme<'a> {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.bump();
        }
        self.lexeme(LexemeKind::Spaces(&self.input[start..self.position]), start)
    }

    /// Consumes a quoted segment. The current character must be the opening quote.
    fn read_quoted(&mut self) -> Result<(), ParseError> {
        let start = self.position;
        self.bump();
        while let Some(c) = self.bump() {
            match c {
                '"' => return Ok(()),
                '\\' => {
                    if self.bump().is_none() {
                        break;
                    }
                }
                '\n' => break,
                _ => {}
            }
        }
        Err(ParseError::UnterminatedQuote { start })
    }

    /// Consumes a `[...]` list segment. Leaves the position untouched and
    /// returns false when the bracket is never closed on this line.
    fn try_read_list(&mut self) -> Result<bool, ParseError> {
        let checkpoint = self.position;
        self.bump();
        loop {
            match self.peek() {
                None | Some('\n') => break,
                Some(c) if self.is_paren(c) => break,
                Some(']') => {
                    self.bump();
                    return Ok(true);
                }
                Some('"') => self.read_quoted()?,
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        self.position = checkpoint;
        Ok(false)
    }

    /// Consumes a function-call segment such as `(transaction.duration)` in
    /// `p95(transaction.duration):>1s`. The matching `)` must be followed by
    /// the key separator `:`; otherwise the position is left untouched and
    /// false is returned.
    fn try_read_call(&mut self) -> Result<bool, ParseError> {
        let checkpoint = self.position;
        let mut depth = 0usize;
        loop {
            match self.peek() {
                None | Some('\n') => break,
                Some('(') => {
                    depth += 1;
                    self.bump();
                }
                Some(')') => {
                    self.bump();
                    depth -= 1;
                    if depth == 0 {
                        if self.peek() == Some(':') {
                            return Ok(true);
                        }
                        break;
                    }
                }
                Some('"') => self.read_quoted()?,
                Some('\\') => {
                    self.bump();
                    self.bump();
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        self.position = checkpoint;
        Ok(false)
    }

    /// Consumes the rest of a word. `prev` is the last character already
    /// consumed as part of this word, if any.
    fn read_word(&mut self, mut prev: Option<char>) -> Result<(), ParseError> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            match c {
                '(' if self.grouping => {
                    let after_name = prev.is_some_and(|p| p.is_alphanumeric() || p == '_' || p == '.');
                    if after_name && self.try_read_call()? {
                        prev = Some(')');
                        continue;
                    }
                    break;
                }
                ')' if self.grouping => break,
                '"' if matches!(prev, None | Some(':' | '=' | '[' | ',')) => {
                    self.read_quoted()?;
                    prev = Some('"');
                }
                '[' if matches!(prev, Some(':' | '=')) => {
                    if !self.try_read_list()? {
                        self.bump();
                    }
                    prev = Some(']');
                }
                '\\' => {
                    self.bump();
                    prev = self.bump().or(Some('\\'));
                }
                _ => {
                    self.bump();
                    prev = Some(c);
                }
            }
        }
        Ok(())
    }

    fn next_lexeme(&mut self) -> Result<Option<Lexeme<'a>>, ParseError> {
        let start = self.position;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let lexeme = match c {
            c if c.is_whitespace() => self.read_spaces(start),
            '(' if self.grouping => {
                self.bump();
                self.lexeme(LexemeKind::LParen, start)
            }
            ')' if self.grouping => {
                self.bump();
                self.lexeme(LexemeKind::RParen, start)
            }
            '"' => {
                self.read_quoted()?;
                let continues = self
                    .peek()
                    .is_some_and(|c| !c.is_whitespace() && !self.is_paren(c));
                if continues {
                    self.read_word(Some('"'))?;
                    self.lexeme(LexemeKind::Word(&self.input[start..self.position]), start)
                } else {
                    self.lexeme(LexemeKind::Quoted(&self.input[start..self.position]), start)
                }
            }
            _ => {
                self.read_word(None)?;
                self.lexeme(LexemeKind::Word(&self.input[start..self.position]), start)
            }
        };
        Ok(Some(lexeme))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Lexeme<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_lexeme() {
            Ok(lexeme) => lexeme.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
