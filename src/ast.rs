//! The token tree produced by the parser.
//!
//! A parse result is a flat, source-ordered sequence of [`Token`]s. Logic
//! groups own their inner sequence, filters own their key and value tokens,
//! and list values own their items. Concatenating the `text` of the top-level
//! tokens reproduces the original query.

use crate::config::SearchConfig;
use crate::token::Span;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// The parser's return value.
pub type ParseResult = Vec<Token>;

/// One classified, located unit of a parsed query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    #[serde(flatten)]
    pub kind: TokenKind,
    pub location: Span,
    /// The slice of the original query covered by `location`
    pub text: String,
    /// The configuration the token was parsed under
    #[serde(skip)]
    pub config: ConfigRef,
}

impl Token {
    pub fn new(kind: TokenKind, location: Span, text: impl Into<String>, config: ConfigRef) -> Self {
        Token {
            kind,
            location,
            text: text.into(),
            config,
        }
    }

    pub fn as_filter(&self) -> Option<&Filter> {
        match &self.kind {
            TokenKind::Filter(filter) => Some(filter),
            _ => None,
        }
    }

    /// Terms are the tokens boolean connectors join together.
    pub fn is_term(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::FreeText { .. } | TokenKind::Filter(_) | TokenKind::LogicGroup { .. }
        )
    }

    /// The field name of a key token.
    pub fn key_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::KeySimple { value, .. } | TokenKind::KeyExplicitTag { value } => Some(value),
            TokenKind::KeyAggregate { .. } => Some(&self.text),
            _ => None,
        }
    }
}

/// Rebuild the query text from a token sequence.
pub fn reconstruct(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Every filter in the tree, in source order, including those inside groups.
pub fn collect_filters(tokens: &[Token]) -> Vec<&Filter> {
    let mut filters = Vec::new();
    let mut pending: Vec<&Token> = tokens.iter().rev().collect();
    while let Some(token) = pending.pop() {
        match &token.kind {
            TokenKind::Filter(filter) => filters.push(filter.as_ref()),
            TokenKind::LogicGroup { inner } => pending.extend(inner.iter().rev()),
            _ => {}
        }
    }
    filters
}

/// Shared, read-only handle to the [`SearchConfig`] a token was parsed under.
///
/// Structural comparison of tokens ignores it.
#[derive(Clone, Default)]
pub struct ConfigRef(pub Arc<SearchConfig>);

impl PartialEq for ConfigRef {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for ConfigRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConfigRef")
    }
}

impl Deref for ConfigRef {
    type Target = SearchConfig;

    fn deref(&self) -> &SearchConfig {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TokenKind {
    Spaces,
    FreeText {
        value: String,
        quoted: bool,
    },
    Filter(Box<Filter>),
    LogicAnd {
        /// Synthesized between adjacent terms; zero width, empty text
        implicit: bool,
    },
    LogicOr,
    LogicGroup {
        inner: Vec<Token>,
    },

    // Keys
    KeySimple {
        value: String,
        quoted: bool,
    },
    /// `tags[key]`
    KeyExplicitTag {
        value: String,
    },
    /// `name(args)`, e.g. `p95(transaction.duration)`
    KeyAggregate {
        name: String,
        args: Vec<String>,
    },

    // Values
    ValueText {
        value: String,
        quoted: bool,
    },
    ValueNumber {
        value: f64,
        unit: Option<NumberUnit>,
    },
    ValueDuration {
        value: f64,
        unit: DurationUnit,
    },
    ValueSize {
        value: f64,
        unit: SizeUnit,
    },
    ValueBoolean {
        value: bool,
    },
    ValueIso8601Date {
        value: DateTime<Utc>,
    },
    /// `-24h`, `+7d`
    ValueRelativeDate {
        value: u64,
        sign: Sign,
        unit: DurationUnit,
    },
    ValueNumberList {
        items: Vec<Token>,
    },
    ValueTextList {
        items: Vec<Token>,
    },
}

/// A `key:value` clause.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub filter_type: FilterType,
    pub negated: bool,
    pub key: Token,
    pub operator: TermOperator,
    pub value: Token,
    /// `None` when both key and value validated
    pub invalid: Option<Invalid>,
}

impl Filter {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    Text,
    TextIn,
    Numeric,
    NumericIn,
    Duration,
    Size,
    Date,
    RelativeDate,
    Boolean,
    Has,
    Is,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TermOperator {
    #[default]
    #[serde(rename = "")]
    Default,
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanEqual,
}

impl TermOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            TermOperator::Default => "",
            TermOperator::Equal => "=",
            TermOperator::NotEqual => "!=",
            TermOperator::GreaterThan => ">",
            TermOperator::GreaterThanEqual => ">=",
            TermOperator::LessThan => "<",
            TermOperator::LessThanEqual => "<=",
        }
    }

    /// Ordering comparisons, only meaningful for ordinal value types.
    pub fn is_ordinal(self) -> bool {
        matches!(
            self,
            TermOperator::GreaterThan
                | TermOperator::GreaterThanEqual
                | TermOperator::LessThan
                | TermOperator::LessThanEqual
        )
    }
}

/// Diagnostic attached to a filter that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invalid {
    pub reason: InvalidReason,
    pub message: String,
}

impl Invalid {
    pub fn new(reason: InvalidReason, message: impl Into<String>) -> Self {
        Invalid {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidReason {
    InvalidKey,
    InvalidDate,
    InvalidDuration,
    InvalidSize,
    InvalidNumber,
    InvalidBoolean,
    InvalidList,
    InvalidOperatorForType,
    EmptyValue,
}

impl InvalidReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InvalidReason::InvalidKey => "invalid-key",
            InvalidReason::InvalidDate => "invalid-date",
            InvalidReason::InvalidDuration => "invalid-duration",
            InvalidReason::InvalidSize => "invalid-size",
            InvalidReason::InvalidNumber => "invalid-number",
            InvalidReason::InvalidBoolean => "invalid-boolean",
            InvalidReason::InvalidList => "invalid-list",
            InvalidReason::InvalidOperatorForType => "invalid-operator-for-type",
            InvalidReason::EmptyValue => "empty-value",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DurationUnit {
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
    #[serde(rename = "w")]
    Weeks,
}

impl DurationUnit {
    /// Parse a unit suffix, case-insensitively.
    pub fn parse(suffix: &str) -> Option<Self> {
        let unit = match suffix.to_ascii_lowercase().as_str() {
            "ms" => DurationUnit::Milliseconds,
            "s" | "sec" => DurationUnit::Seconds,
            "m" | "min" => DurationUnit::Minutes,
            "h" | "hr" => DurationUnit::Hours,
            "d" | "day" => DurationUnit::Days,
            "w" | "wk" => DurationUnit::Weeks,
            _ => return None,
        };
        Some(unit)
    }

    pub fn millis(self) -> f64 {
        match self {
            DurationUnit::Milliseconds => 1.0,
            DurationUnit::Seconds => 1_000.0,
            DurationUnit::Minutes => 60_000.0,
            DurationUnit::Hours => 3_600_000.0,
            DurationUnit::Days => 86_400_000.0,
            DurationUnit::Weeks => 604_800_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Bit,
    Nb,
    Bytes,
    Kb,
    Mb,
    Gb,
    Tb,
    Pb,
    Eb,
    Zb,
    Yb,
    Kib,
    Mib,
    Gib,
    Tib,
    Pib,
    Eib,
    Zib,
    Yib,
}

impl SizeUnit {
    pub fn parse(suffix: &str) -> Option<Self> {
        let unit = match suffix.to_ascii_lowercase().as_str() {
            "bit" => SizeUnit::Bit,
            "nb" => SizeUnit::Nb,
            "bytes" => SizeUnit::Bytes,
            "kb" => SizeUnit::Kb,
            "mb" => SizeUnit::Mb,
            "gb" => SizeUnit::Gb,
            "tb" => SizeUnit::Tb,
            "pb" => SizeUnit::Pb,
            "eb" => SizeUnit::Eb,
            "zb" => SizeUnit::Zb,
            "yb" => SizeUnit::Yb,
            "kib" => SizeUnit::Kib,
            "mib" => SizeUnit::Mib,
            "gib" => SizeUnit::Gib,
            "tib" => SizeUnit::Tib,
            "pib" => SizeUnit::Pib,
            "eib" => SizeUnit::Eib,
            "zib" => SizeUnit::Zib,
            "yib" => SizeUnit::Yib,
            _ => return None,
        };
        Some(unit)
    }

    /// How many bytes one of this unit is.
    pub fn bytes(self) -> f64 {
        match self {
            SizeUnit::Bit => 0.125,
            SizeUnit::Nb => 0.5,
            SizeUnit::Bytes => 1.0,
            SizeUnit::Kb => 1e3,
            SizeUnit::Mb => 1e6,
            SizeUnit::Gb => 1e9,
            SizeUnit::Tb => 1e12,
            SizeUnit::Pb => 1e15,
            SizeUnit::Eb => 1e18,
            SizeUnit::Zb => 1e21,
            SizeUnit::Yb => 1e24,
            SizeUnit::Kib => 1024f64,
            SizeUnit::Mib => 1024f64.powi(2),
            SizeUnit::Gib => 1024f64.powi(3),
            SizeUnit::Tib => 1024f64.powi(4),
            SizeUnit::Pib => 1024f64.powi(5),
            SizeUnit::Eib => 1024f64.powi(6),
            SizeUnit::Zib => 1024f64.powi(7),
            SizeUnit::Yib => 1024f64.powi(8),
        }
    }
}

/// Multiplier suffix on numeric values: `5k`, `2m`, `1b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumberUnit {
    #[serde(rename = "k")]
    Thousand,
    #[serde(rename = "m")]
    Million,
    #[serde(rename = "b")]
    Billion,
}

impl NumberUnit {
    pub fn parse(suffix: &str) -> Option<Self> {
        match suffix {
            "k" | "K" => Some(NumberUnit::Thousand),
            "m" | "M" => Some(NumberUnit::Million),
            "b" | "B" => Some(NumberUnit::Billion),
            _ => None,
        }
    }

    pub fn multiplier(self) -> f64 {
        match self {
            NumberUnit::Thousand => 1e3,
            NumberUnit::Million => 1e6,
            NumberUnit::Billion => 1e9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Sign {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
}
