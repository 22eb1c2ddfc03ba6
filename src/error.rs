//! Error types for search query parsing.
//!
//! Only structural failures live here. A filter whose key or value fails
//! validation is not an error: it is returned as a token carrying an
//! [`Invalid`](crate::ast::Invalid) diagnostic.

use crate::token::Span;
use std::path::PathBuf;

/// Fatal parse failures. No partial result is produced for any of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated quoted string starting at byte {start}")]
    UnterminatedQuote { start: usize },

    #[error("unbalanced parentheses: unexpected ')' at byte {offset}")]
    UnexpectedCloseParen { offset: usize },

    #[error("unbalanced parentheses: group opened at byte {offset} is never closed")]
    UnclosedGroup { offset: usize },

    #[error("groups nested deeper than {limit} levels at byte {offset}")]
    NestingTooDeep { limit: usize, offset: usize },

    #[error("query contains no search terms")]
    EmptyQuery,
}

impl ParseError {
    /// The byte span the error points at, if it has one.
    pub fn span(&self) -> Option<Span> {
        match *self {
            ParseError::UnterminatedQuote { start } => Some(Span::new(start, start + 1)),
            ParseError::UnexpectedCloseParen { offset }
            | ParseError::UnclosedGroup { offset }
            | ParseError::NestingTooDeep { offset, .. } => Some(Span::new(offset, offset + 1)),
            ParseError::EmptyQuery => None,
        }
    }
}

/// Failures while loading a [`SearchConfig`](crate::config::SearchConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file does not exist: {0}")]
    NotFound(PathBuf),

    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
