//! Grammar configuration, optionally loaded from a JSON file.
//!
//! Every option gates which grammar rules are active or which validation
//! failures are surfaced. A parse call shares the configuration read-only
//! through an `Arc`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Parser configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Which filter keys are recognized
    pub allowed_keys: KeyPolicy,
    /// What happens to a filter whose key `allowed_keys` rejects
    pub unknown_keys: UnknownKeys,
    /// Recognize `AND` / `OR` keywords; otherwise they are free text
    pub allow_boolean_operators: bool,
    /// Recognize parentheses as grouping; otherwise they are plain characters
    pub allow_paren_grouping: bool,
    pub date_strictness: DateStrictness,
    /// Deepest permitted group nesting
    pub max_depth: usize,
    /// Merge consecutive unquoted free-text words into one token
    pub coalesce_free_text: bool,
    /// Fail when the query holds no search terms
    pub require_terms: bool,
    /// Value type of known keys. Keys not listed infer their type from the value.
    pub key_types: HashMap<String, KeyType>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            allowed_keys: KeyPolicy::Permissive,
            unknown_keys: UnknownKeys::FreeText,
            allow_boolean_operators: true,
            allow_paren_grouping: true,
            date_strictness: DateStrictness::Lenient,
            max_depth: 64,
            coalesce_free_text: true,
            require_terms: false,
            key_types: default_key_types(),
        }
    }
}

impl SearchConfig {
    /// Load a config from a JSON file. Missing fields fall back to their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: SearchConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        info!(
            path = %path.display(),
            typed_keys = config.key_types.len(),
            "loaded search config"
        );
        Ok(config)
    }

    /// The declared type of `key`, if any.
    pub fn key_type(&self, key: &str) -> Option<KeyType> {
        self.key_types.get(key).copied()
    }

    pub fn is_key_allowed(&self, key: &str) -> bool {
        match &self.allowed_keys {
            KeyPolicy::Permissive => true,
            KeyPolicy::AllowList(keys) => keys.contains(key),
            KeyPolicy::Predicate(predicate) => predicate.test(key),
        }
    }
}

/// Which keys a filter may use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "mode", content = "keys")]
pub enum KeyPolicy {
    #[default]
    Permissive,
    AllowList(BTreeSet<String>),
    /// Caller-supplied strategy; not representable in JSON
    #[serde(skip)]
    Predicate(KeyPredicate),
}

impl KeyPolicy {
    pub fn allow_list<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPolicy::AllowList(keys.into_iter().map(Into::into).collect())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        KeyPolicy::Predicate(KeyPredicate(Arc::new(f)))
    }
}

/// A shareable key validation function.
#[derive(Clone)]
pub struct KeyPredicate(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl KeyPredicate {
    pub fn test(&self, key: &str) -> bool {
        (self.0)(key)
    }
}

impl fmt::Debug for KeyPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyPredicate(..)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownKeys {
    /// Treat the whole `key:value` word as free text
    #[default]
    FreeText,
    /// Keep the filter and mark it `invalid-key`
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateStrictness {
    /// Also accept naive date-times (taken as UTC) and minute precision
    #[default]
    Lenient,
    /// Only `YYYY-MM-DD` or RFC 3339 with an explicit offset
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    Text,
    Number,
    Duration,
    Size,
    Date,
    Boolean,
}

/// Well-known event fields and their value types.
fn default_key_types() -> HashMap<String, KeyType> {
    let mut types = HashMap::new();
    for key in ["timestamp", "time", "created", "first_seen", "last_seen", "event.timestamp"] {
        types.insert(key.to_string(), KeyType::Date);
    }
    for key in [
        "transaction.duration",
        "measurements.fp",
        "measurements.fcp",
        "measurements.lcp",
        "measurements.ttfb",
        "span.duration",
    ] {
        types.insert(key.to_string(), KeyType::Duration);
    }
    for key in ["times_seen", "project_id", "issue.id", "measurements.cls"] {
        types.insert(key.to_string(), KeyType::Number);
    }
    for key in ["error.handled", "error.unhandled", "stack.in_app"] {
        types.insert(key.to_string(), KeyType::Boolean);
    }
    for key in ["http.response_content_length", "http.decoded_response_content_length"] {
        types.insert(key.to_string(), KeyType::Size);
    }
    for key in ["event.type", "transaction", "message", "release", "environment"] {
        types.insert(key.to_string(), KeyType::Text);
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.key_type("transaction.duration"), Some(KeyType::Duration));
        assert_eq!(config.key_type("created"), Some(KeyType::Date));
        assert_eq!(config.key_type("unknown.key"), None);
        assert!(config.is_key_allowed("anything"));
        assert_eq!(config.max_depth, 64);
    }

    #[test]
    fn test_allow_list_policy() {
        let config = SearchConfig {
            allowed_keys: KeyPolicy::allow_list(["user.id", "release"]),
            ..Default::default()
        };
        assert!(config.is_key_allowed("release"));
        assert!(!config.is_key_allowed("browser"));
    }

    #[test]
    fn test_predicate_policy() {
        let config = SearchConfig {
            allowed_keys: KeyPolicy::predicate(|key| key.starts_with("tags.")),
            ..Default::default()
        };
        assert!(config.is_key_allowed("tags.color"));
        assert!(!config.is_key_allowed("color"));
    }

    #[test]
    fn test_load_valid_json_config() {
        let path = std::env::temp_dir().join("search_syntax_valid_config.json");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{
                "allowed_keys": {{"mode": "allow-list", "keys": ["a", "b"]}},
                "unknown_keys": "invalid",
                "date_strictness": "strict",
                "key_types": {{"a": "number"}}
            }}"#
        )
        .unwrap();

        let config = SearchConfig::from_json_file(&path).unwrap();
        assert!(config.is_key_allowed("a"));
        assert!(!config.is_key_allowed("c"));
        assert_eq!(config.unknown_keys, UnknownKeys::Invalid);
        assert_eq!(config.date_strictness, DateStrictness::Strict);
        assert_eq!(config.key_type("a"), Some(KeyType::Number));
        // Unspecified fields keep their defaults
        assert!(config.allow_boolean_operators);
        assert_eq!(config.max_depth, 64);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_invalid_json_config() {
        let path = std::env::temp_dir().join("search_syntax_invalid_config.json");
        fs::write(&path, "invalid json").unwrap();

        let result = SearchConfig::from_json_file(&path);
        assert!(matches!(result, Err(ConfigError::Json { .. })));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file() {
        let result = SearchConfig::from_json_file("non_existent_search_config.json");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
