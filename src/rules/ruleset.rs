// Tue Jan 27 2026 - Alex

use crate::errors::{Error, Result};
use crate::results::{decode_text, hex_dump, MetaValue};
use crate::rules::condition::{Condition, ExternalValue};
use crate::rules::pattern::BytePattern;
use bitflags::bitflags;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

bitflags! {
    /// Modifiers accepted on text string declarations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StringModifiers: u8 {
        const NOCASE = 0b0001;
        const WIDE = 0b0010;
        const ASCII = 0b0100;
        const FULLWORD = 0b1000;
    }
}

impl Default for StringModifiers {
    fn default() -> Self {
        StringModifiers::empty()
    }
}

/// One raw match hit before it is copied into the result model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMatch {
    pub offset: usize,
    pub len: usize,
}

/// The pattern body of a declared string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StringKind {
    /// `$a = "text"` — raw declared bytes (`\xNN` escapes included verbatim),
    /// encoded per modifiers at scan time.
    Text { value: Vec<u8> },
    /// `$b = { 48 65 ?? }` — byte pattern with wildcards.
    Hex(BytePattern),
    /// `$c = /expr/` — bytes regex, compiled lazily after deserialization.
    Regex {
        source: String,
        #[serde(skip)]
        compiled: OnceCell<regex::bytes::Regex>,
    },
}

/// A declared string pattern within a compiled rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringDef {
    pub identifier: String,
    pub kind: StringKind,
    pub modifiers: StringModifiers,
}

impl StringDef {
    pub fn new(identifier: String, kind: StringKind, modifiers: StringModifiers) -> Self {
        Self {
            identifier,
            kind,
            modifiers,
        }
    }

    /// Ensures regex sources compile. Run at build time and again after
    /// deserialization so scan-time failures cannot happen for valid input.
    pub fn validate(&self) -> Result<()> {
        if let StringKind::Regex { .. } = self.kind {
            self.compiled_regex()?;
        }
        Ok(())
    }

    fn compiled_regex(&self) -> Result<&regex::bytes::Regex> {
        match &self.kind {
            StringKind::Regex { source, compiled } => compiled
                .get_or_try_init(|| regex::bytes::Regex::new(source))
                .map_err(|e| Error::Internal(format!("regex '{}': {}", source, e))),
            _ => Err(Error::Internal(format!(
                "string {} is not a regex",
                self.identifier
            ))),
        }
    }

    /// All occurrences of this string in `data`, ascending offset order.
    pub fn find_matches(&self, data: &[u8]) -> Result<Vec<RawMatch>> {
        match &self.kind {
            StringKind::Text { value } => Ok(self.find_text_matches(value, data)),
            StringKind::Hex(pattern) => Ok(pattern
                .find_all_in(data)
                .iter()
                .map(|&offset| RawMatch {
                    offset,
                    len: pattern.len(),
                })
                .collect()),
            StringKind::Regex { .. } => {
                let regex = self.compiled_regex()?;
                Ok(regex
                    .find_iter(data)
                    .map(|m| RawMatch {
                        offset: m.start(),
                        len: m.len(),
                    })
                    .collect())
            }
        }
    }

    fn find_text_matches(&self, value: &[u8], data: &[u8]) -> Vec<RawMatch> {
        let nocase = self.modifiers.contains(StringModifiers::NOCASE);
        let fullword = self.modifiers.contains(StringModifiers::FULLWORD);
        let wide = self.modifiers.contains(StringModifiers::WIDE);
        // ascii is the default; `wide` alone disables the ascii variant.
        let ascii = self.modifiers.contains(StringModifiers::ASCII) || !wide;

        let mut hits = Vec::new();
        if ascii {
            let needle = value;
            for offset in find_needle(data, needle, nocase) {
                if !fullword || is_fullword(data, offset, needle.len(), false) {
                    hits.push(RawMatch {
                        offset,
                        len: needle.len(),
                    });
                }
            }
        }
        if wide {
            let needle = encode_wide(value);
            for offset in find_needle(data, &needle, nocase) {
                if !fullword || is_fullword(data, offset, needle.len(), true) {
                    hits.push(RawMatch {
                        offset,
                        len: needle.len(),
                    });
                }
            }
        }

        hits.sort_by_key(|m| (m.offset, m.len));
        hits.dedup();
        hits
    }

    /// Display form for a matched slice: hex dump for hex patterns, lossy
    /// UTF-8 for the rest. Raw bytes stay authoritative.
    pub fn render_text(&self, matched: &[u8]) -> String {
        match self.kind {
            StringKind::Hex(_) => hex_dump(matched),
            _ => decode_text(matched),
        }
    }
}

/// Expansion used by the `wide` modifier: each pattern byte followed by a
/// NUL, UTF-16LE over the Latin-1 range.
fn encode_wide(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() * 2);
    for &b in value {
        out.push(b);
        out.push(0);
    }
    out
}

fn find_needle(data: &[u8], needle: &[u8], nocase: bool) -> Vec<usize> {
    let mut results = Vec::new();
    if needle.is_empty() || data.len() < needle.len() {
        return results;
    }

    for i in 0..=(data.len() - needle.len()) {
        let window = &data[i..i + needle.len()];
        let hit = if nocase {
            window.eq_ignore_ascii_case(needle)
        } else {
            window == needle
        };
        if hit {
            results.push(i);
        }
    }
    results
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_fullword(data: &[u8], offset: usize, len: usize, wide: bool) -> bool {
    let step = if wide { 2 } else { 1 };
    if offset >= step && is_word_byte(data[offset - step]) {
        return false;
    }
    if offset + len + step <= data.len() && is_word_byte(data[offset + len]) {
        return false;
    }
    true
}

/// One metadata entry as compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaDef {
    pub identifier: String,
    pub value: MetaValue,
}

/// A fully compiled rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledRule {
    pub identifier: String,
    pub namespace: String,
    pub tags: Vec<String>,
    pub metas: Vec<MetaDef>,
    pub strings: Vec<StringDef>,
    pub condition: Condition,
    /// Identifiers of strings the condition references, declaration order.
    pub referenced: Vec<String>,
    pub is_private: bool,
    pub is_global: bool,
}

impl CompiledRule {
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.identifier)
    }

    pub fn string(&self, identifier: &str) -> Option<&StringDef> {
        self.strings.iter().find(|s| s.identifier == identifier)
    }
}

/// The immutable compiled artifact: rules in declaration order plus the
/// external variables baked in at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
    externals: HashMap<String, ExternalValue>,
    imports: Vec<String>,
}

impl RuleSet {
    pub fn new(
        rules: Vec<CompiledRule>,
        externals: HashMap<String, ExternalValue>,
        imports: Vec<String>,
    ) -> Self {
        Self {
            rules,
            externals,
            imports,
        }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn externals(&self) -> &HashMap<String, ExternalValue> {
        &self.externals
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Revalidates lazily-compiled parts, used after deserialization.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            for string in &rule.strings {
                string.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_def(value: &str, modifiers: StringModifiers) -> StringDef {
        StringDef::new(
            "$t".to_string(),
            StringKind::Text {
                value: value.as_bytes().to_vec(),
            },
            modifiers,
        )
    }

    #[test]
    fn test_text_plain_match() {
        let def = text_def("Hello world", StringModifiers::empty());
        let hits = def.find_matches(b"Hello world").unwrap();
        assert_eq!(hits, vec![RawMatch { offset: 0, len: 11 }]);
    }

    #[test]
    fn test_text_nocase() {
        let def = text_def("hello", StringModifiers::NOCASE);
        let hits = def.find_matches(b"say HELLO twice, heLLo").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].offset, 4);
        assert_eq!(hits[1].offset, 17);
    }

    #[test]
    fn test_text_wide_only() {
        let def = text_def("Hi", StringModifiers::WIDE);
        let data = b"xxH\x00i\x00yy";
        let hits = def.find_matches(data).unwrap();
        assert_eq!(hits, vec![RawMatch { offset: 2, len: 4 }]);
        // No ascii variant when only `wide` is set.
        assert!(def.find_matches(b"Hi there").unwrap().is_empty());
    }

    #[test]
    fn test_text_wide_and_ascii() {
        let def = text_def("Hi", StringModifiers::WIDE | StringModifiers::ASCII);
        let data = b"Hi and H\x00i\x00";
        let hits = def.find_matches(data).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].offset, 0);
        assert_eq!(hits[1].offset, 7);
    }

    #[test]
    fn test_text_high_bytes_match_raw() {
        let def = StringDef::new(
            "$t".to_string(),
            StringKind::Text {
                value: vec![0xFF, 0xFE],
            },
            StringModifiers::empty(),
        );
        let hits = def.find_matches(&[0x00, 0xFF, 0xFE, 0x00]).unwrap();
        assert_eq!(hits, vec![RawMatch { offset: 1, len: 2 }]);
    }

    #[test]
    fn test_text_fullword() {
        let def = text_def("scan", StringModifiers::FULLWORD);
        let hits = def.find_matches(b"scan scanner rescan scan.").unwrap();
        let offsets: Vec<_> = hits.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 20]);
    }

    #[test]
    fn test_hex_matches() {
        let pattern = BytePattern::new(vec![0x48, 0x00, 0x6C], vec![true, false, true]);
        let def = StringDef::new(
            "$h".to_string(),
            StringKind::Hex(pattern),
            StringModifiers::empty(),
        );
        let hits = def.find_matches(b"HelHal").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], RawMatch { offset: 0, len: 3 });
        assert_eq!(hits[1], RawMatch { offset: 3, len: 3 });
    }

    #[test]
    fn test_regex_matches() {
        let def = StringDef::new(
            "$r".to_string(),
            StringKind::Regex {
                source: "ab+c".to_string(),
                compiled: OnceCell::new(),
            },
            StringModifiers::empty(),
        );
        def.validate().unwrap();
        let hits = def.find_matches(b"xabbbc abc").unwrap();
        assert_eq!(hits[0], RawMatch { offset: 1, len: 5 });
        assert_eq!(hits[1], RawMatch { offset: 7, len: 3 });
    }

    #[test]
    fn test_invalid_regex_fails_validate() {
        let def = StringDef::new(
            "$r".to_string(),
            StringKind::Regex {
                source: "(".to_string(),
                compiled: OnceCell::new(),
            },
            StringModifiers::empty(),
        );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_render_text_per_kind() {
        let hex = StringDef::new(
            "$h".to_string(),
            StringKind::Hex(BytePattern::from_literal(b"Hi")),
            StringModifiers::empty(),
        );
        assert_eq!(hex.render_text(b"Hi"), "48 69");

        let text = text_def("Hi", StringModifiers::empty());
        assert_eq!(text.render_text(b"Hi"), "Hi");
    }

    #[test]
    fn test_ruleset_roundtrip_serde() {
        let rule = CompiledRule {
            identifier: "R".to_string(),
            namespace: "default".to_string(),
            tags: vec![],
            metas: vec![],
            strings: vec![StringDef::new(
                "$r".to_string(),
                StringKind::Regex {
                    source: "a+".to_string(),
                    compiled: OnceCell::new(),
                },
                StringModifiers::empty(),
            )],
            condition: Condition::StringRef("$r".to_string()),
            referenced: vec!["$r".to_string()],
            is_private: false,
            is_global: false,
        };
        let set = RuleSet::new(vec![rule], HashMap::new(), vec![]);

        let json = serde_json::to_string(&set).unwrap();
        let back: RuleSet = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(back.rule_count(), 1);
        assert!(!back.rules()[0].strings[0]
            .find_matches(b"aaa")
            .unwrap()
            .is_empty());
    }
}
