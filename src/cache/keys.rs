//! Cache key construction and parsing.
//!
//! Keys have the shape `category:contentHash[:discriminator...]`. The content
//! hash is a SHA-256 over a canonical JSON rendering of the input, so logically
//! equal inputs produce the same key regardless of map key order.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of the `content_hash` column.
pub const MAX_CONTENT_HASH_LEN: usize = 64;
/// Default literal prefix of the `<marker>_<n>` discriminator segment.
pub const DEFAULT_KEY_MARKER: &str = "discriminator";

const SEPARATOR: char = ':';
const MIN_BARE_HASH_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("cache category must be non-empty and must not contain `:`")]
    InvalidCategory,
    #[error("cache key segment `{0}` must be non-empty and must not contain `:`")]
    InvalidSegment(String),
    #[error("cache content could not be serialized: {0}")]
    Serialize(String),
}

/// Analytics fields recovered from a key string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub content_hash: String,
    pub category: String,
}

/// Parses composite keys into `(content_hash, category)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    marker: String,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_MARKER)
    }
}

impl KeyCodec {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Recover the content hash and category of `key`.
    ///
    /// Never fails: a key that does not follow the layout yields an empty hash,
    /// which only affects grouping by hash.
    pub fn parse(&self, key: &str) -> ParsedKey {
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        let category = segments.first().copied().unwrap_or_default().to_string();

        let marked = segments
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, segment)| self.is_marker(segment))
            .map(|(index, _)| index);

        let content_hash = match marked {
            // The segment before the marker, as long as it is not the category itself.
            Some(index) if index >= 2 => segments[index - 1],
            Some(_) => "",
            None => match segments.get(1) {
                Some(candidate) if is_bare_hash(candidate) => *candidate,
                _ => "",
            },
        };

        ParsedKey {
            content_hash: truncate_chars(content_hash, MAX_CONTENT_HASH_LEN),
            category,
        }
    }

    fn is_marker(&self, segment: &str) -> bool {
        segment
            .strip_prefix(self.marker.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|digits| {
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            })
    }
}

fn is_bare_hash(segment: &str) -> bool {
    (MIN_BARE_HASH_LEN..=MAX_CONTENT_HASH_LEN).contains(&segment.len())
        && segment
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// SHA-256 hex digest of the canonical JSON form of `content`.
///
/// Callers pass only the semantically relevant input; settings that do not
/// change the result must be stripped beforehand.
pub fn content_hash<T: Serialize + ?Sized>(content: &T) -> Result<String, KeyError> {
    let value =
        serde_json::to_value(content).map_err(|err| KeyError::Serialize(err.to_string()))?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Render JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Builder for well-formed composite keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    category: String,
    content_hash: String,
    discriminators: Vec<String>,
}

impl CacheKey {
    /// Key over the canonical hash of `content`.
    pub fn for_content<T: Serialize + ?Sized>(
        category: impl Into<String>,
        content: &T,
    ) -> Result<Self, KeyError> {
        let hash = content_hash(content)?;
        Self::from_hash(category, hash)
    }

    pub fn from_hash(
        category: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let category = category.into();
        if !valid_segment(&category) {
            return Err(KeyError::InvalidCategory);
        }
        let content_hash = content_hash.into();
        if !valid_segment(&content_hash) {
            return Err(KeyError::InvalidSegment(content_hash));
        }
        Ok(Self {
            category,
            content_hash,
            discriminators: Vec::new(),
        })
    }

    /// Append a free-form discriminator segment.
    pub fn with(mut self, discriminator: impl Into<String>) -> Result<Self, KeyError> {
        let discriminator = discriminator.into();
        if !valid_segment(&discriminator) {
            return Err(KeyError::InvalidSegment(discriminator));
        }
        self.discriminators.push(discriminator);
        Ok(self)
    }

    /// Append the `<marker>_<n>` segment recognised by [`KeyCodec`].
    pub fn with_index(mut self, marker: &str, index: u64) -> Result<Self, KeyError> {
        if !valid_segment(marker) {
            return Err(KeyError::InvalidSegment(marker.to_string()));
        }
        self.discriminators.push(format!("{marker}_{index}"));
        Ok(self)
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.category, self.content_hash)?;
        for discriminator in &self.discriminators {
            write!(f, "{SEPARATOR}{discriminator}")?;
        }
        Ok(())
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn parses_hash_before_marker() {
        let codec = KeyCodec::default();
        let parsed = codec.parse(&format!("summary:{HASH}:extra:discriminator_3"));
        assert_eq!(parsed.category, "summary");
        assert_eq!(parsed.content_hash, "extra");
    }

    #[test]
    fn marker_directly_after_category_yields_empty_hash() {
        let codec = KeyCodec::default();
        let parsed = codec.parse("summary:discriminator_1");
        assert_eq!(parsed.category, "summary");
        assert_eq!(parsed.content_hash, "");
    }

    #[test]
    fn falls_back_to_bare_hex_second_segment() {
        let codec = KeyCodec::default();
        let parsed = codec.parse(&format!("query_gen:{HASH}:v2"));
        assert_eq!(parsed.content_hash, HASH);
        assert_eq!(parsed.category, "query_gen");
    }

    #[test]
    fn rejects_short_or_uppercase_hex() {
        let codec = KeyCodec::default();
        assert_eq!(codec.parse("query_gen:abc:finding_1").content_hash, "");
        assert_eq!(
            codec
                .parse(&format!("query_gen:{}", HASH.to_uppercase()))
                .content_hash,
            ""
        );
    }

    #[test]
    fn custom_marker_is_honoured() {
        let codec = KeyCodec::new("finding");
        let parsed = codec.parse("query_gen:abc:finding_1");
        assert_eq!(parsed.category, "query_gen");
        assert_eq!(parsed.content_hash, "abc");
    }

    #[test]
    fn marker_requires_digits() {
        let codec = KeyCodec::default();
        assert_eq!(codec.parse("c:abc:discriminator_").content_hash, "");
        assert_eq!(codec.parse("c:abc:discriminator_x1").content_hash, "");
    }

    #[test]
    fn truncates_hash_to_column_width() {
        let codec = KeyCodec::default();
        let long = "x".repeat(80);
        let parsed = codec.parse(&format!("c:{long}:discriminator_9"));
        assert_eq!(parsed.content_hash.len(), MAX_CONTENT_HASH_LEN);
    }

    #[test]
    fn key_without_separator_is_all_category() {
        let parsed = KeyCodec::default().parse("plain");
        assert_eq!(parsed.category, "plain");
        assert_eq!(parsed.content_hash, "");
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let first = content_hash(&json!({"a": 1, "b": {"y": [1, 2], "x": null}})).expect("hash");
        let second = content_hash(&json!({"b": {"x": null, "y": [1, 2]}, "a": 1})).expect("hash");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn content_hash_respects_array_order() {
        let first = content_hash(&json!([1, 2])).expect("hash");
        let second = content_hash(&json!([2, 1])).expect("hash");
        assert_ne!(first, second);
    }

    #[test]
    fn built_keys_round_trip_through_codec() {
        let key = CacheKey::for_content("summary", &json!({"text": "hello"}))
            .and_then(|k| k.with_index(DEFAULT_KEY_MARKER, 4))
            .expect("key");
        let rendered = key.to_string();
        let parsed = KeyCodec::default().parse(&rendered);

        assert_eq!(parsed.category, "summary");
        assert_eq!(parsed.content_hash, key.content_hash());
    }

    #[test]
    fn builder_rejects_separator_in_segments() {
        assert_eq!(
            CacheKey::from_hash("a:b", HASH),
            Err(KeyError::InvalidCategory)
        );
        let err = CacheKey::from_hash("a", HASH)
            .and_then(|k| k.with("x:y"))
            .expect_err("separator rejected");
        assert!(matches!(err, KeyError::InvalidSegment(_)));
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let rendered = canonical_json(&json!({"b": 1, "a": {"d": true, "c": "s"}}));
        assert_eq!(rendered, r#"{"a":{"c":"s","d":true},"b":1}"#);
    }
}
