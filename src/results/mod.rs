// Mon Jan 26 2026 - Alex

//! Owned result model handed to scan callbacks.
//!
//! Everything here is deep-copied out of the scan context at the moment a
//! rule is reported, so a `Rule` stays valid for as long as the caller keeps
//! it. Every sequence accessor returns a fresh iterator; consuming one has
//! no effect on the next.

use std::borrow::Cow;
use std::fmt;

/// A matched (or, in not-satisfied-only mode, unmatched) rule as reported to
/// the scan callback.
#[derive(Debug, Clone)]
pub struct Rule {
    identifier: String,
    namespace: String,
    tags: Vec<String>,
    metadata: Vec<Meta>,
    strings: Vec<StringMatches>,
}

impl Rule {
    pub(crate) fn new(
        identifier: String,
        namespace: String,
        tags: Vec<String>,
        metadata: Vec<Meta>,
        strings: Vec<StringMatches>,
    ) -> Self {
        Self {
            identifier,
            namespace,
            tags,
            metadata,
            strings,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Tags in declaration order. Repeated tags are preserved as declared.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    /// Metadata entries in declaration order.
    pub fn metadata(&self) -> impl Iterator<Item = &Meta> {
        self.metadata.iter()
    }

    /// String patterns referenced by the rule condition, in declaration
    /// order. Strings that produced no matches are still present with an
    /// empty match sequence.
    pub fn strings(&self) -> impl Iterator<Item = &StringMatches> {
        self.strings.iter()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identifier)
    }
}

/// One metadata entry: identifier plus a string, integer, or boolean value.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    identifier: String,
    value: MetaValue,
}

impl Meta {
    pub(crate) fn new(identifier: String, value: MetaValue) -> Self {
        Self { identifier, value }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn value(&self) -> &MetaValue {
        &self.value
    }

    pub fn meta_type(&self) -> MetaType {
        self.value.meta_type()
    }

    /// String value, `None` when the entry is not a string.
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer value, `None` when the entry is not an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self.value {
            MetaValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    /// Boolean value, `None` when the entry is not a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            MetaValue::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaType {
    String,
    Integer,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum MetaValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl MetaValue {
    pub fn meta_type(&self) -> MetaType {
        match self {
            MetaValue::String(_) => MetaType::String,
            MetaValue::Integer(_) => MetaType::Integer,
            MetaValue::Boolean(_) => MetaType::Boolean,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::String(s) => write!(f, "\"{}\"", s),
            MetaValue::Integer(i) => write!(f, "{}", i),
            MetaValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// One declared string pattern and the matches it produced in the scanned
/// content.
#[derive(Debug, Clone)]
pub struct StringMatches {
    identifier: String,
    matches: Vec<Match>,
}

impl StringMatches {
    pub(crate) fn new(identifier: String, matches: Vec<Match>) -> Self {
        Self {
            identifier,
            matches,
        }
    }

    /// Declared pattern name, including the `$` sigil.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Matches in ascending offset order. Fresh iterator on every call.
    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.matches.iter()
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// One occurrence of a string pattern within the scanned content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    offset: u64,
    data: Vec<u8>,
    text: String,
}

impl Match {
    pub(crate) fn new(offset: u64, data: Vec<u8>, text: String) -> Self {
        Self { offset, data, text }
    }

    /// Byte offset of the match within the scanned content.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Text form of the matched value. Text and regex patterns decode the
    /// raw bytes as lossy UTF-8; hex patterns render an uppercase hex dump.
    /// The raw bytes are authoritative, this form is for display.
    pub fn value(&self) -> &str {
        &self.text
    }

    /// Raw matched bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.offset, self.text)
    }
}

/// Lossy UTF-8 decode used for text and regex match values.
pub(crate) fn decode_text(data: &[u8]) -> String {
    match String::from_utf8_lossy(data) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

/// Uppercase space-separated hex dump used for hex match values.
pub(crate) fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> Rule {
        Rule::new(
            "Sample".to_string(),
            "default".to_string(),
            vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()],
            vec![
                Meta::new("author".to_string(), MetaValue::String("pba".to_string())),
                Meta::new("weight".to_string(), MetaValue::Integer(24)),
                Meta::new("live".to_string(), MetaValue::Boolean(true)),
            ],
            vec![StringMatches::new(
                "$a".to_string(),
                vec![Match::new(0, b"hello".to_vec(), "hello".to_string())],
            )],
        )
    }

    #[test]
    fn test_iterators_restart_fresh() {
        let rule = sample_rule();

        let first: Vec<_> = rule.tags().collect();
        let second: Vec<_> = rule.tags().collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["alpha", "beta", "alpha"]);

        let string = rule.strings().next().unwrap();
        assert_eq!(string.matches().count(), 1);
        assert_eq!(string.matches().count(), 1);
    }

    #[test]
    fn test_meta_typed_accessors() {
        let rule = sample_rule();
        let metas: Vec<_> = rule.metadata().collect();

        assert_eq!(metas[0].meta_type(), MetaType::String);
        assert_eq!(metas[0].as_str(), Some("pba"));
        assert_eq!(metas[0].as_integer(), None);

        assert_eq!(metas[1].meta_type(), MetaType::Integer);
        assert_eq!(metas[1].as_integer(), Some(24));
        assert_eq!(metas[1].as_bool(), None);

        assert_eq!(metas[2].meta_type(), MetaType::Boolean);
        assert_eq!(metas[2].as_bool(), Some(true));
        assert_eq!(metas[2].as_str(), None);
    }

    #[test]
    fn test_hex_dump_format() {
        assert_eq!(hex_dump(b"Hello world"), "48 65 6C 6C 6F 20 77 6F 72 6C 64");
        assert_eq!(hex_dump(&[]), "");
    }

    #[test]
    fn test_decode_text_lossy() {
        assert_eq!(decode_text(b"plain"), "plain");
        // Invalid UTF-8 degrades, never panics.
        let decoded = decode_text(&[0xFF, 0x48, 0x69]);
        assert!(decoded.contains("Hi"));
    }

    #[test]
    fn test_match_accessors() {
        let m = Match::new(7, vec![0x48, 0x69], "Hi".to_string());
        assert_eq!(m.offset(), 7);
        assert_eq!(m.bytes(), &[0x48, 0x69]);
        assert_eq!(m.value(), "Hi");
        assert_eq!(m.len(), 2);
    }
}
