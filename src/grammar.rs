//! Grammar rules for a single word of the query.
//!
//! A word containing an unescaped `:` outside quotes, brackets and parentheses
//! is split into `[!]key:[operator]value`. The key is classified, checked
//! against the key policy, and the value is coerced into a typed token. Any
//! validation failure is recorded on the filter instead of failing the parse.
//!
//! Value type resolution:
//!
//! ```text
//! key in config.key_types ──► coerce to that type, or mark invalid
//! otherwise              ──► infer: relative date → ISO date → duration → size → number → text
//! quoted values          ──► text (typed keys coerce the unquoted content)
//! [a,b,c]                ──► number list if every item is a number, text list otherwise
//! ```

use crate::ast::{
    ConfigRef, DurationUnit, Filter, FilterType, Invalid, InvalidReason, NumberUnit, Sign,
    SizeUnit, TermOperator, Token, TokenKind,
};
use crate::config::{DateStrictness, KeyType, UnknownKeys};
use crate::token::Span;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::borrow::Cow;

/// The raw pieces of a `key:value` word, with offsets local to the word.
#[derive(Debug, Clone, PartialEq)]
struct FilterParts<'a> {
    negated: bool,
    key: &'a str,
    key_start: usize,
    operator: TermOperator,
    value: &'a str,
    value_start: usize,
}

/// A coerced value before it is wrapped into a token.
struct Coerced {
    filter_type: FilterType,
    value: TokenKind,
    invalid: Option<Invalid>,
}

impl Coerced {
    fn valid(filter_type: FilterType, value: TokenKind) -> Self {
        Coerced {
            filter_type,
            value,
            invalid: None,
        }
    }

    fn invalid(filter_type: FilterType, value: TokenKind, invalid: Invalid) -> Self {
        Coerced {
            filter_type,
            value,
            invalid: Some(invalid),
        }
    }
}

/// Try to read `word` as a filter. `None` means the word is free text.
pub(crate) fn parse_filter(word: &str, offset: usize, config: &ConfigRef) -> Option<Token> {
    let parts = split_filter(word)?;
    let key_kind = classify_key(parts.key)?;
    let key = Token::new(
        key_kind,
        Span::new(parts.key_start, parts.key_start + parts.key.len()).offset(offset),
        parts.key,
        config.clone(),
    );
    let name = key.key_name()?.to_string();

    let reserved = matches!(
        &key.kind,
        TokenKind::KeySimple { value, quoted: false } if value == "has" || value == "is"
    );

    let mut invalid = None;
    if !reserved && !config.is_key_allowed(&name) {
        match config.unknown_keys {
            UnknownKeys::FreeText => return None,
            UnknownKeys::Invalid => {
                invalid = Some(Invalid::new(
                    InvalidReason::InvalidKey,
                    format!("Invalid key. \"{name}\" is not a supported search key."),
                ));
            }
        }
    }

    let value_start = offset + parts.value_start;
    let coerced = if reserved {
        coerce_reserved(&name, parts.value, value_start, parts.operator, config)
    } else {
        coerce_value(parts.value, value_start, config.key_type(&name), parts.operator, config)
    };

    let value = Token::new(
        coerced.value,
        Span::new(value_start, offset + word.len()),
        parts.value,
        config.clone(),
    );

    let filter = Filter {
        filter_type: coerced.filter_type,
        negated: parts.negated,
        key,
        operator: parts.operator,
        value,
        invalid: invalid.or(coerced.invalid),
    };

    Some(Token::new(
        TokenKind::Filter(Box::new(filter)),
        Span::new(offset, offset + word.len()),
        word,
        config.clone(),
    ))
}

fn split_filter(word: &str) -> Option<FilterParts<'_>> {
    let (negated, key_start) = match word.strip_prefix('!') {
        Some(rest) if !rest.is_empty() => (true, 1),
        _ => (false, 0),
    };
    let body = &word[key_start..];
    let key_end = find_key_end(body)?;
    if key_end == 0 {
        return None;
    }

    let after = &body[key_end + 1..];
    let (operator, operator_len) = parse_operator(after);

    Some(FilterParts {
        negated,
        key: &body[..key_end],
        key_start,
        operator,
        value: &after[operator_len..],
        value_start: key_start + key_end + 1 + operator_len,
    })
}

/// Byte index of the `:` separating key from value.
fn find_key_end(body: &str) -> Option<usize> {
    if body.starts_with('"') {
        let close = closing_quote(body)?;
        return body[close + 1..].starts_with(':').then_some(close + 1);
    }

    let mut depth = 0usize;
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            '"' => return None,
            ':' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Index of the quote closing the quoted string `s` starts with.
fn closing_quote(s: &str) -> Option<usize> {
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => return Some(i),
            _ => {}
        }
    }
    None
}

/// The content of `raw` if it is exactly one quoted string.
pub(crate) fn unquote(raw: &str) -> Option<String> {
    if !raw.starts_with('"') || closing_quote(raw)? != raw.len() - 1 {
        return None;
    }
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\')) => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn parse_operator(s: &str) -> (TermOperator, usize) {
    const OPERATORS: [(&str, TermOperator); 6] = [
        (">=", TermOperator::GreaterThanEqual),
        ("<=", TermOperator::LessThanEqual),
        ("!=", TermOperator::NotEqual),
        (">", TermOperator::GreaterThan),
        ("<", TermOperator::LessThan),
        ("=", TermOperator::Equal),
    ];
    OPERATORS
        .iter()
        .find(|(symbol, _)| s.starts_with(symbol))
        .map(|(symbol, op)| (*op, symbol.len()))
        .unwrap_or((TermOperator::Default, 0))
}

fn is_simple_key(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn classify_key(raw: &str) -> Option<TokenKind> {
    if raw.starts_with('"') {
        let value = unquote(raw).filter(|v| !v.is_empty())?;
        return Some(TokenKind::KeySimple {
            value,
            quoted: true,
        });
    }

    if let Some(inner) = raw.strip_prefix("tags[").and_then(|r| r.strip_suffix(']')) {
        return is_simple_key(inner).then(|| TokenKind::KeyExplicitTag {
            value: inner.to_string(),
        });
    }

    if let (Some(open), true) = (raw.find('('), raw.ends_with(')')) {
        let name = &raw[..open];
        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'));
        if !valid_name {
            return None;
        }
        let args = raw[open + 1..raw.len() - 1]
            .split(',')
            .map(str::trim)
            .filter(|arg| !arg.is_empty())
            .map(String::from)
            .collect();
        return Some(TokenKind::KeyAggregate {
            name: name.to_string(),
            args,
        });
    }

    is_simple_key(raw).then(|| TokenKind::KeySimple {
        value: raw.to_string(),
        quoted: false,
    })
}

fn empty_value(filter_type: FilterType) -> Coerced {
    Coerced::invalid(
        filter_type,
        TokenKind::ValueText {
            value: String::new(),
            quoted: false,
        },
        Invalid::new(InvalidReason::EmptyValue, "Filter must have a value."),
    )
}

fn filter_type_for(key_type: Option<KeyType>) -> FilterType {
    match key_type {
        None | Some(KeyType::Text) => FilterType::Text,
        Some(KeyType::Number) => FilterType::Numeric,
        Some(KeyType::Duration) => FilterType::Duration,
        Some(KeyType::Size) => FilterType::Size,
        Some(KeyType::Date) => FilterType::Date,
        Some(KeyType::Boolean) => FilterType::Boolean,
    }
}

fn is_ordinal(filter_type: FilterType) -> bool {
    matches!(
        filter_type,
        FilterType::Numeric
            | FilterType::Duration
            | FilterType::Size
            | FilterType::Date
            | FilterType::RelativeDate
    )
}

fn operator_not_allowed(operator: TermOperator, filter_type: FilterType) -> Invalid {
    Invalid::new(
        InvalidReason::InvalidOperatorForType,
        format!(
            "Invalid operator. \"{}\" cannot be used with {:?} filters.",
            operator.symbol(),
            filter_type
        ),
    )
}

/// `has:` and `is:` filters.
fn coerce_reserved(
    name: &str,
    raw: &str,
    start: usize,
    operator: TermOperator,
    config: &ConfigRef,
) -> Coerced {
    let filter_type = if name == "has" {
        FilterType::Has
    } else {
        FilterType::Is
    };
    if raw.is_empty() {
        return empty_value(filter_type);
    }
    if raw.starts_with('[') && raw.ends_with(']') {
        let (items, _) = list_items(raw, start, None, config);
        return Coerced::invalid(
            filter_type,
            TokenKind::ValueTextList { items },
            Invalid::new(
                InvalidReason::InvalidList,
                format!("\"{name}\" filters do not accept lists."),
            ),
        );
    }

    let value = TokenKind::ValueText {
        value: raw.to_string(),
        quoted: false,
    };
    if filter_type == FilterType::Has && classify_key(raw).is_none() {
        return Coerced::invalid(
            filter_type,
            value,
            Invalid::new(
                InvalidReason::InvalidKey,
                format!("Invalid key. \"has\" expects a field name, got \"{raw}\"."),
            ),
        );
    }
    if operator.is_ordinal() {
        return Coerced::invalid(filter_type, value, operator_not_allowed(operator, filter_type));
    }
    Coerced::valid(filter_type, value)
}

fn coerce_value(
    raw: &str,
    start: usize,
    key_type: Option<KeyType>,
    operator: TermOperator,
    config: &ConfigRef,
) -> Coerced {
    if raw.is_empty() {
        return empty_value(filter_type_for(key_type));
    }

    let mut coerced = if raw.starts_with('[') && raw.ends_with(']') && raw.len() >= 2 {
        coerce_list(raw, start, key_type, config)
    } else {
        coerce_scalar(raw, key_type, config)
    };

    if coerced.invalid.is_none() && operator.is_ordinal() && !is_ordinal(coerced.filter_type) {
        coerced.invalid = Some(operator_not_allowed(operator, coerced.filter_type));
    }
    coerced
}

fn coerce_scalar(raw: &str, key_type: Option<KeyType>, config: &ConfigRef) -> Coerced {
    let (text, quoted): (Cow<'_, str>, bool) = match unquote(raw) {
        Some(content) => (Cow::Owned(content), true),
        None => (Cow::Borrowed(raw), false),
    };
    let as_text = || TokenKind::ValueText {
        value: text.to_string(),
        quoted,
    };

    let Some(key_type) = key_type else {
        if quoted {
            return Coerced::valid(FilterType::Text, as_text());
        }
        return infer_scalar(&text, config.date_strictness)
            .map(|(filter_type, value)| Coerced::valid(filter_type, value))
            .unwrap_or_else(|| Coerced::valid(FilterType::Text, as_text()));
    };

    let filter_type = filter_type_for(Some(key_type));
    let parsed = match key_type {
        KeyType::Text => return Coerced::valid(FilterType::Text, as_text()),
        KeyType::Date => parse_date_value(&text, config.date_strictness),
        KeyType::Duration => parse_duration(&text).map(|v| (FilterType::Duration, v)),
        KeyType::Size => parse_size(&text).map(|v| (FilterType::Size, v)),
        KeyType::Number => parse_number(&text, true).map(|v| (FilterType::Numeric, v)),
        KeyType::Boolean => parse_boolean(&text).map(|v| (FilterType::Boolean, v)),
    };

    match parsed {
        Some((filter_type, value)) => Coerced::valid(filter_type, value),
        None => Coerced::invalid(filter_type, as_text(), type_mismatch(key_type)),
    }
}

fn type_mismatch(key_type: KeyType) -> Invalid {
    match key_type {
        KeyType::Date => Invalid::new(
            InvalidReason::InvalidDate,
            "Invalid date format. Expected +/-duration (e.g. +1h) or ISO 8601-like (e.g. 2021-01-01T00:00:00).",
        ),
        KeyType::Duration => Invalid::new(
            InvalidReason::InvalidDuration,
            "Invalid duration. Expected number followed by duration unit suffix (ms, s, m, h, d, w).",
        ),
        KeyType::Size => Invalid::new(
            InvalidReason::InvalidSize,
            "Invalid size. Expected number followed by a size unit suffix (e.g. kb, mib).",
        ),
        KeyType::Number => Invalid::new(
            InvalidReason::InvalidNumber,
            "Invalid number. Expected number then optional k, m, or b suffix (e.g. 500k).",
        ),
        KeyType::Boolean => Invalid::new(
            InvalidReason::InvalidBoolean,
            "Invalid boolean. Expected true, 1, false, or 0.",
        ),
        KeyType::Text => Invalid::new(InvalidReason::EmptyValue, "Filter must have a value."),
    }
}

fn infer_scalar(text: &str, strictness: DateStrictness) -> Option<(FilterType, TokenKind)> {
    parse_date_value(text, strictness)
        .or_else(|| parse_duration(text).map(|v| (FilterType::Duration, v)))
        .or_else(|| parse_size(text).map(|v| (FilterType::Size, v)))
        .or_else(|| parse_number(text, false).map(|v| (FilterType::Numeric, v)))
}

fn coerce_list(raw: &str, start: usize, key_type: Option<KeyType>, config: &ConfigRef) -> Coerced {
    let (items, has_empty) = list_items(raw, start, key_type, config);

    if items.is_empty() || has_empty {
        let message = if items.is_empty() {
            "Lists must contain at least one value."
        } else {
            "Lists cannot contain empty values."
        };
        return Coerced::invalid(
            FilterType::TextIn,
            TokenKind::ValueTextList { items },
            Invalid::new(InvalidReason::EmptyValue, message),
        );
    }

    let all_numbers = items
        .iter()
        .all(|item| matches!(item.kind, TokenKind::ValueNumber { .. }));

    match key_type {
        Some(KeyType::Number) | None if all_numbers => {
            Coerced::valid(FilterType::NumericIn, TokenKind::ValueNumberList { items })
        }
        Some(KeyType::Number) => Coerced::invalid(
            FilterType::NumericIn,
            TokenKind::ValueTextList {
                items: items.into_iter().map(into_text_item).collect(),
            },
            type_mismatch(KeyType::Number),
        ),
        None | Some(KeyType::Text) => Coerced::valid(
            FilterType::TextIn,
            TokenKind::ValueTextList {
                items: items.into_iter().map(into_text_item).collect(),
            },
        ),
        Some(other) => Coerced::invalid(
            filter_type_for(Some(other)),
            TokenKind::ValueTextList {
                items: items.into_iter().map(into_text_item).collect(),
            },
            Invalid::new(
                InvalidReason::InvalidList,
                format!("Lists are not supported for {other:?} filters."),
            ),
        ),
    }
}

/// Split `[a, "b c", 3]` into item tokens. Numbers are only recognized for
/// untyped and number keys. Also reports whether any item was empty.
fn list_items(
    raw: &str,
    start: usize,
    key_type: Option<KeyType>,
    config: &ConfigRef,
) -> (Vec<Token>, bool) {
    let inner = &raw[1..raw.len() - 1];
    let numbers = matches!(key_type, None | Some(KeyType::Number));
    let allow_suffix = key_type == Some(KeyType::Number);

    let mut items = Vec::new();
    let mut has_empty = false;
    if inner.trim().is_empty() {
        return (items, false);
    }

    for (local, piece) in split_top_level(inner) {
        let trimmed = piece.trim_start();
        let lead = piece.len() - trimmed.len();
        let item = trimmed.trim_end();
        if item.is_empty() {
            has_empty = true;
            continue;
        }

        let item_start = start + 1 + local + lead;
        let kind = match unquote(item) {
            Some(value) => TokenKind::ValueText {
                value,
                quoted: true,
            },
            None => numbers
                .then(|| parse_number(item, allow_suffix))
                .flatten()
                .unwrap_or_else(|| TokenKind::ValueText {
                    value: item.to_string(),
                    quoted: false,
                }),
        };
        items.push(Token::new(
            kind,
            Span::new(item_start, item_start + item.len()),
            item,
            config.clone(),
        ));
    }
    (items, has_empty)
}

/// Comma-separated pieces outside quotes, with their local offsets.
fn split_top_level(s: &str) -> Vec<(usize, &str)> {
    let mut pieces = Vec::new();
    let mut piece_start = 0;
    let mut in_quotes = false;
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                pieces.push((piece_start, &s[piece_start..i]));
                piece_start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push((piece_start, &s[piece_start..]));
    pieces
}

fn into_text_item(item: Token) -> Token {
    match item.kind {
        TokenKind::ValueText { .. } => item,
        _ => Token {
            kind: TokenKind::ValueText {
                value: item.text.clone(),
                quoted: false,
            },
            ..item
        },
    }
}

/// Length of the leading `\d+(\.\d*)?` of `s`.
fn magnitude_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 {
        return 0;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    i
}

/// Split `15.5ms` into `(15.5, "ms")`.
fn split_magnitude(s: &str) -> Option<(f64, &str)> {
    let len = magnitude_len(s);
    if len == 0 {
        return None;
    }
    let value = s[..len].parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((value, &s[len..]))
}

fn parse_number(text: &str, allow_suffix: bool) -> Option<TokenKind> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (magnitude, suffix) = split_magnitude(body)?;
    let unit = match suffix {
        "" => None,
        s if allow_suffix => Some(NumberUnit::parse(s)?),
        _ => return None,
    };
    let value = if negative { -magnitude } else { magnitude };
    Some(TokenKind::ValueNumber { value, unit })
}

fn parse_duration(text: &str) -> Option<TokenKind> {
    let (value, suffix) = split_magnitude(text)?;
    let unit = DurationUnit::parse(suffix)?;
    Some(TokenKind::ValueDuration { value, unit })
}

fn parse_size(text: &str) -> Option<TokenKind> {
    let (value, suffix) = split_magnitude(text)?;
    let unit = SizeUnit::parse(suffix)?;
    Some(TokenKind::ValueSize { value, unit })
}

fn parse_boolean(text: &str) -> Option<TokenKind> {
    let value = if text.eq_ignore_ascii_case("true") || text == "1" {
        true
    } else if text.eq_ignore_ascii_case("false") || text == "0" {
        false
    } else {
        return None;
    };
    Some(TokenKind::ValueBoolean { value })
}

/// Relative date (`-24h`) or ISO-8601 date.
fn parse_date_value(text: &str, strictness: DateStrictness) -> Option<(FilterType, TokenKind)> {
    if let Some(relative) = parse_relative_date(text) {
        return Some((FilterType::RelativeDate, relative));
    }
    parse_iso_date(text, strictness)
        .map(|value| (FilterType::Date, TokenKind::ValueIso8601Date { value }))
}

fn parse_relative_date(text: &str) -> Option<TokenKind> {
    let sign = match text.chars().next()? {
        '+' => Sign::Plus,
        '-' => Sign::Minus,
        _ => return None,
    };
    let body = &text[1..];
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let value = body[..digits].parse::<u64>().ok()?;
    let unit = match &body[digits..] {
        "m" => DurationUnit::Minutes,
        "h" => DurationUnit::Hours,
        "d" => DurationUnit::Days,
        "w" => DurationUnit::Weeks,
        _ => return None,
    };
    Some(TokenKind::ValueRelativeDate { value, sign, unit })
}

/// Parse a full date or date-time into a UTC instant.
pub(crate) fn parse_iso_date(text: &str, strictness: DateStrictness) -> Option<DateTime<Utc>> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(text) {
        return Some(date_time.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    if strictness == DateStrictness::Strict {
        return None;
    }

    if let Ok(date_time) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(date_time.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|dt| dt.and_utc())
}
