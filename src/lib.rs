//! Parser for Sentry-style search queries.
//!
//! ```text
//! transaction.duration:<15m event.type:transaction (browser:firefox OR os:linux) "free text"
//! ```
//!
//! A query is parsed into a flat, source-ordered sequence of located
//! [`Token`]s: free text, `key:value` filters with typed values, boolean
//! connectors and parenthesized groups. Filters that are well formed but fail
//! validation carry an [`Invalid`] diagnostic instead of failing the parse;
//! only structural problems (an unterminated quote, unbalanced parentheses,
//! nesting past the configured limit) are a [`ParseError`].
//!
//! ```
//! use search_syntax::{parse_search, TokenKind};
//!
//! let tokens = parse_search("transaction.duration:<15m").unwrap();
//! let filter = tokens[0].as_filter().unwrap();
//! assert_eq!(filter.key.key_name(), Some("transaction.duration"));
//! assert!(matches!(filter.value.kind, TokenKind::ValueDuration { .. }));
//! ```

pub mod ast;
pub mod config;
pub mod error;
mod grammar;
pub mod lexer;
pub mod logic;
pub mod parser;
pub mod sql_compiler;
pub mod token;
pub mod transform;

use std::sync::{Arc, OnceLock};

pub use ast::{
    collect_filters, reconstruct, ConfigRef, Filter, FilterType, Invalid, InvalidReason,
    ParseResult, TermOperator, Token, TokenKind,
};
pub use config::{DateStrictness, KeyPolicy, KeyType, SearchConfig, UnknownKeys};
pub use error::{ConfigError, ParseError};
pub use logic::LogicTree;
pub use parser::Parser;
pub use token::Span;
pub use transform::tree_transformer;

fn default_config() -> Arc<SearchConfig> {
    static DEFAULT: OnceLock<Arc<SearchConfig>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(SearchConfig::default()))
        .clone()
}

/// Parse `query` with the default configuration.
pub fn parse_search(query: &str) -> Result<ParseResult, ParseError> {
    parse_search_with_config(query, default_config())
}

/// Parse `query` under `config`.
pub fn parse_search_with_config(
    query: &str,
    config: Arc<SearchConfig>,
) -> Result<ParseResult, ParseError> {
    Parser::new(query, config).parse()
}
