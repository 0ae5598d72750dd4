// Wed Jan 28 2026 - Alex

//! Recursive-descent parser for the rule language subset.
//!
//! Accepts `import`/`include` directives and `rule` blocks with meta,
//! strings (text with modifiers, hex with `??` wildcards, regex), and a
//! boolean condition over string matches, counts, and external variables.
//! Diagnostics are collected with source label and 1-based line numbers;
//! after a fatal error inside a rule the parser resynchronizes at the next
//! top-level rule so later rules still get checked.

use crate::compiler::diagnostics::Diagnostic;
use crate::results::MetaValue;
use crate::rules::condition::{CompareOp, Condition, ExternalValue, Quantifier, StringSet};
use crate::rules::pattern::BytePattern;
use crate::rules::ruleset::{CompiledRule, MetaDef, StringDef, StringKind, StringModifiers};
use once_cell::sync::OnceCell;
use std::collections::HashMap;

const MAX_INCLUDE_DEPTH: usize = 8;

/// Resolves an `include "path"` directive to rule text. Receives the label
/// of the including source and the include path.
pub type IncludeResolver<'a> = dyn FnMut(&str, &str) -> std::io::Result<String> + 'a;

/// A parsed rule plus the line its declaration starts on, so later stages
/// (duplicate detection in particular) can point at the source.
pub struct ParsedRule {
    pub rule: CompiledRule,
    pub line: u32,
}

pub struct ParseOutput {
    pub rules: Vec<ParsedRule>,
    pub imports: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn parse_source(
    text: &str,
    label: &str,
    namespace: &str,
    externals: &HashMap<String, ExternalValue>,
    resolver: &mut IncludeResolver<'_>,
) -> ParseOutput {
    parse_source_at_depth(text, label, namespace, externals, resolver, 0)
}

fn parse_source_at_depth(
    text: &str,
    label: &str,
    namespace: &str,
    externals: &HashMap<String, ExternalValue>,
    resolver: &mut IncludeResolver<'_>,
    depth: usize,
) -> ParseOutput {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
        line: 1,
        label: label.to_string(),
        namespace: namespace.to_string(),
        externals,
        resolver,
        depth,
        rules: Vec::new(),
        imports: Vec::new(),
        diagnostics: Vec::new(),
    };
    parser.run();
    ParseOutput {
        rules: parser.rules,
        imports: parser.imports,
        diagnostics: parser.diagnostics,
    }
}

// Fatal-at-this-site marker; the diagnostic is already recorded.
type PResult<T> = Result<T, ()>;

struct Parser<'a, 'r> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    label: String,
    namespace: String,
    externals: &'a HashMap<String, ExternalValue>,
    resolver: &'a mut IncludeResolver<'r>,
    depth: usize,
    rules: Vec<ParsedRule>,
    imports: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a, 'r> Parser<'a, 'r> {
    fn run(&mut self) {
        loop {
            self.skip_trivia();
            if self.at_eof() {
                break;
            }

            let line = self.line;
            let Ok(word) = self.expect_ident("directive or rule") else {
                self.synchronize();
                continue;
            };

            match word.as_str() {
                "import" => {
                    if let Ok(name) = self.expect_text_literal() {
                        self.imports.push(name);
                    } else {
                        self.synchronize();
                    }
                }
                "include" => {
                    if let Ok(path) = self.expect_text_literal() {
                        self.process_include(&path, line);
                    } else {
                        self.synchronize();
                    }
                }
                "rule" => {
                    if self.parse_rule(false, false, line).is_err() {
                        self.synchronize();
                    }
                }
                "private" | "global" => {
                    let mut is_private = word == "private";
                    let mut is_global = word == "global";
                    loop {
                        let Ok(next) = self.expect_ident("rule") else {
                            self.synchronize();
                            break;
                        };
                        match next.as_str() {
                            "private" => is_private = true,
                            "global" => is_global = true,
                            "rule" => {
                                if self.parse_rule(is_private, is_global, line).is_err() {
                                    self.synchronize();
                                }
                                break;
                            }
                            other => {
                                self.error(line, format!("expected 'rule', found '{}'", other));
                                self.synchronize();
                                break;
                            }
                        }
                    }
                }
                other => {
                    self.error(
                        line,
                        format!("expected 'rule', 'import' or 'include', found '{}'", other),
                    );
                    self.synchronize();
                }
            }
        }
    }

    fn process_include(&mut self, path: &str, line: u32) {
        if self.depth >= MAX_INCLUDE_DEPTH {
            self.error(line, format!("include depth limit reached at '{}'", path));
            return;
        }
        match (self.resolver)(&self.label, path) {
            Ok(text) => {
                let sub = parse_source_at_depth(
                    &text,
                    path,
                    &self.namespace,
                    self.externals,
                    &mut *self.resolver,
                    self.depth + 1,
                );
                self.rules.extend(sub.rules);
                self.imports.extend(sub.imports);
                self.diagnostics.extend(sub.diagnostics);
            }
            Err(e) => {
                self.error(line, format!("can't open include file '{}': {}", path, e));
            }
        }
    }

    fn parse_rule(&mut self, is_private: bool, is_global: bool, rule_line: u32) -> PResult<()> {
        let name = self.expect_ident("rule name")?;

        let mut tags = Vec::new();
        self.skip_trivia();
        if self.peek() == Some(':') {
            self.bump();
            loop {
                self.skip_trivia();
                if self.peek() == Some('{') {
                    break;
                }
                tags.push(self.expect_ident("tag")?);
            }
            if tags.is_empty() {
                self.error(self.line, "tag list is empty");
                return Err(());
            }
        }

        self.expect_char('{')?;

        let mut metas = Vec::new();
        let mut strings: Vec<StringDef> = Vec::new();

        if self.try_section("meta") {
            self.parse_meta_entries(&mut metas)?;
        }
        if self.try_section("strings") {
            self.parse_string_entries(&mut strings)?;
        }

        self.skip_trivia();
        let cond_line = self.line;
        let section = self.expect_ident("condition section")?;
        if section != "condition" {
            self.error(cond_line, format!("expected 'condition', found '{}'", section));
            return Err(());
        }
        self.expect_char(':')?;

        let declared: Vec<String> = strings.iter().map(|s| s.identifier.clone()).collect();
        let condition = self.parse_or_expr(&declared)?;
        self.expect_char('}')?;

        let referenced = condition.referenced_strings(&declared);
        for def in &strings {
            if !referenced.contains(&def.identifier) {
                self.warning(
                    rule_line,
                    format!(
                        "string {} declared in rule {} but never referenced",
                        def.identifier, name
                    ),
                );
            }
        }

        self.rules.push(ParsedRule {
            rule: CompiledRule {
                identifier: name,
                namespace: self.namespace.clone(),
                tags,
                metas,
                strings,
                condition,
                referenced,
                is_private,
                is_global,
            },
            line: rule_line,
        });
        Ok(())
    }

    /// Consumes `name :` when the next token matches the section name.
    fn try_section(&mut self, name: &str) -> bool {
        self.skip_trivia();
        let save = (self.pos, self.line);
        if let Ok(word) = self.read_ident() {
            if word == name {
                self.skip_trivia();
                if self.peek() == Some(':') {
                    self.bump();
                    return true;
                }
            }
        }
        self.pos = save.0;
        self.line = save.1;
        false
    }

    fn parse_meta_entries(&mut self, metas: &mut Vec<MetaDef>) -> PResult<()> {
        loop {
            self.skip_trivia();
            match self.peek() {
                Some('}') | None => return Ok(()),
                Some(c) if c.is_alphabetic() || c == '_' => {
                    if self.peek_is_section() {
                        return Ok(());
                    }
                    let line = self.line;
                    let key = self.expect_ident("meta identifier")?;
                    self.expect_char('=')?;
                    let value = self.parse_meta_value(line)?;
                    metas.push(MetaDef {
                        identifier: key,
                        value,
                    });
                }
                _ => {
                    self.error(self.line, "expected meta entry");
                    return Err(());
                }
            }
        }
    }

    fn peek_is_section(&mut self) -> bool {
        let save = (self.pos, self.line);
        let is_section = match self.read_ident() {
            Ok(word) if word == "strings" || word == "condition" => {
                self.skip_trivia();
                self.peek() == Some(':')
            }
            _ => false,
        };
        self.pos = save.0;
        self.line = save.1;
        is_section
    }

    fn parse_meta_value(&mut self, line: u32) -> PResult<MetaValue> {
        self.skip_trivia();
        match self.peek() {
            Some('"') => Ok(MetaValue::String(self.expect_text_literal()?)),
            Some('-') => {
                self.bump();
                Ok(MetaValue::Integer(-self.expect_int()?))
            }
            Some(c) if c.is_ascii_digit() => Ok(MetaValue::Integer(self.expect_int()?)),
            Some(c) if c.is_alphabetic() => {
                let word = self.expect_ident("meta value")?;
                match word.as_str() {
                    "true" => Ok(MetaValue::Boolean(true)),
                    "false" => Ok(MetaValue::Boolean(false)),
                    other => {
                        self.error(line, format!("invalid meta value '{}'", other));
                        Err(())
                    }
                }
            }
            _ => {
                self.error(line, "expected meta value");
                Err(())
            }
        }
    }

    fn parse_string_entries(&mut self, strings: &mut Vec<StringDef>) -> PResult<()> {
        loop {
            self.skip_trivia();
            if self.peek() != Some('$') {
                return Ok(());
            }
            let line = self.line;
            self.bump();
            let name = self.expect_ident("string identifier")?;
            let identifier = format!("${}", name);
            if strings.iter().any(|s| s.identifier == identifier) {
                self.error(line, format!("duplicate string identifier {}", identifier));
                return Err(());
            }
            self.expect_char('=')?;
            self.skip_trivia();

            let def = match self.peek() {
                Some('"') => {
                    let value = self.expect_string_literal()?;
                    if value.is_empty() {
                        self.error(line, format!("string {} is empty", identifier));
                        return Err(());
                    }
                    let modifiers = self.parse_modifiers(line)?;
                    StringDef::new(identifier, StringKind::Text { value }, modifiers)
                }
                Some('{') => {
                    let pattern = self.parse_hex_body()?;
                    StringDef::new(identifier, StringKind::Hex(pattern), StringModifiers::empty())
                }
                Some('/') => {
                    let source = self.parse_regex_body()?;
                    if let Err(e) = regex::bytes::Regex::new(&source) {
                        self.error(line, format!("invalid regex: {}", e));
                        return Err(());
                    }
                    StringDef::new(
                        identifier,
                        StringKind::Regex {
                            source,
                            compiled: OnceCell::new(),
                        },
                        StringModifiers::empty(),
                    )
                }
                _ => {
                    self.error(line, "expected \"text\", { hex } or /regex/");
                    return Err(());
                }
            };
            strings.push(def);
        }
    }

    fn parse_modifiers(&mut self, line: u32) -> PResult<StringModifiers> {
        let mut modifiers = StringModifiers::empty();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(c) if c.is_alphabetic() => {
                    if self.peek_is_section() {
                        return Ok(modifiers);
                    }
                    let save = (self.pos, self.line);
                    let word = self.expect_ident("modifier")?;
                    let flag = match word.as_str() {
                        "nocase" => StringModifiers::NOCASE,
                        "wide" => StringModifiers::WIDE,
                        "ascii" => StringModifiers::ASCII,
                        "fullword" => StringModifiers::FULLWORD,
                        _ => {
                            // Not a modifier; belongs to whatever comes next.
                            self.pos = save.0;
                            self.line = save.1;
                            self.error(line, format!("unknown string modifier '{}'", word));
                            return Err(());
                        }
                    };
                    modifiers |= flag;
                }
                _ => return Ok(modifiers),
            }
        }
    }

    fn parse_hex_body(&mut self) -> PResult<BytePattern> {
        let line = self.line;
        self.expect_char('{')?;
        let mut bytes = Vec::new();
        let mut mask = Vec::new();

        loop {
            self.skip_trivia();
            match self.peek() {
                Some('}') => {
                    self.bump();
                    break;
                }
                Some('?') => {
                    self.bump();
                    if self.peek() == Some('?') {
                        self.bump();
                    }
                    bytes.push(0);
                    mask.push(false);
                }
                Some(c) if c.is_ascii_hexdigit() => {
                    let hi = self.bump().unwrap_or('0');
                    let lo = match self.peek() {
                        Some(c2) if c2.is_ascii_hexdigit() => self.bump().unwrap_or('0'),
                        _ => {
                            self.error(self.line, "hex byte needs two digits");
                            return Err(());
                        }
                    };
                    let value = (hi.to_digit(16).unwrap_or(0) * 16 + lo.to_digit(16).unwrap_or(0)) as u8;
                    bytes.push(value);
                    mask.push(true);
                }
                Some(other) => {
                    self.error(self.line, format!("unexpected '{}' in hex string", other));
                    return Err(());
                }
                None => {
                    self.error(line, "unterminated hex string");
                    return Err(());
                }
            }
        }

        if bytes.is_empty() {
            self.error(line, "hex string is empty");
            return Err(());
        }
        Ok(BytePattern::new(bytes, mask))
    }

    fn parse_regex_body(&mut self) -> PResult<String> {
        let line = self.line;
        self.expect_char('/')?;
        let mut source = String::new();
        loop {
            match self.bump() {
                Some('/') => return Ok(source),
                Some('\\') => {
                    source.push('\\');
                    match self.bump() {
                        Some(c) => source.push(c),
                        None => {
                            self.error(line, "unterminated regex");
                            return Err(());
                        }
                    }
                }
                Some('\n') | None => {
                    self.error(line, "unterminated regex");
                    return Err(());
                }
                Some(c) => source.push(c),
            }
        }
    }

    // Condition grammar: or > and > not > primary.

    fn parse_or_expr(&mut self, declared: &[String]) -> PResult<Condition> {
        let mut lhs = self.parse_and_expr(declared)?;
        while self.try_keyword("or") {
            let rhs = self.parse_and_expr(declared)?;
            lhs = Condition::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and_expr(&mut self, declared: &[String]) -> PResult<Condition> {
        let mut lhs = self.parse_unary(declared)?;
        while self.try_keyword("and") {
            let rhs = self.parse_unary(declared)?;
            lhs = Condition::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self, declared: &[String]) -> PResult<Condition> {
        if self.try_keyword("not") {
            let inner = self.parse_unary(declared)?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary(declared)
    }

    fn parse_primary(&mut self, declared: &[String]) -> PResult<Condition> {
        self.skip_trivia();
        let line = self.line;
        match self.peek() {
            Some('(') => {
                self.bump();
                let inner = self.parse_or_expr(declared)?;
                self.expect_char(')')?;
                Ok(inner)
            }
            Some('$') => {
                self.bump();
                let name = self.expect_ident("string reference")?;
                let identifier = format!("${}", name);
                self.check_declared(&identifier, declared, line)?;
                Ok(Condition::StringRef(identifier))
            }
            Some('#') => {
                self.bump();
                let name = self.expect_ident("string reference")?;
                let identifier = format!("${}", name);
                self.check_declared(&identifier, declared, line)?;
                let op = self.parse_compare_op(line)?;
                let value = self.expect_int()?;
                Ok(Condition::Count {
                    identifier,
                    op,
                    value,
                })
            }
            Some(c) if c.is_ascii_digit() => {
                let n = self.expect_int()?;
                if n < 0 {
                    self.error(line, "of-quantifier must be non-negative");
                    return Err(());
                }
                self.expect_keyword("of", line)?;
                let set = self.parse_string_set(declared, line)?;
                Ok(Condition::Of {
                    quantifier: Quantifier::AtLeast(n as u64),
                    set,
                })
            }
            Some(c) if c.is_alphabetic() || c == '_' => {
                let word = self.expect_ident("condition term")?;
                match word.as_str() {
                    "true" => Ok(Condition::Boolean(true)),
                    "false" => Ok(Condition::Boolean(false)),
                    "any" | "all" => {
                        self.expect_keyword("of", line)?;
                        let set = self.parse_string_set(declared, line)?;
                        let quantifier = if word == "any" {
                            Quantifier::Any
                        } else {
                            Quantifier::All
                        };
                        Ok(Condition::Of { quantifier, set })
                    }
                    other => {
                        if self.externals.contains_key(other) {
                            Ok(Condition::External(other.to_string()))
                        } else {
                            self.error(line, format!("undefined identifier '{}'", other));
                            Err(())
                        }
                    }
                }
            }
            _ => {
                self.error(line, "expected condition expression");
                Err(())
            }
        }
    }

    fn parse_string_set(&mut self, declared: &[String], line: u32) -> PResult<StringSet> {
        self.skip_trivia();
        if self.peek() == Some('(') {
            self.bump();
            let mut refs = Vec::new();
            loop {
                self.skip_trivia();
                if self.peek() == Some('$') {
                    self.bump();
                    let name = self.expect_ident("string reference")?;
                    let identifier = format!("${}", name);
                    self.check_declared(&identifier, declared, line)?;
                    refs.push(identifier);
                } else {
                    self.error(self.line, "expected string reference in of-list");
                    return Err(());
                }
                self.skip_trivia();
                match self.peek() {
                    Some(',') => {
                        self.bump();
                    }
                    Some(')') => {
                        self.bump();
                        return Ok(StringSet::List(refs));
                    }
                    _ => {
                        self.error(self.line, "expected ',' or ')' in of-list");
                        return Err(());
                    }
                }
            }
        }

        let word = self.expect_ident("'them' or of-list")?;
        if word == "them" {
            Ok(StringSet::Them)
        } else {
            self.error(line, format!("expected 'them', found '{}'", word));
            Err(())
        }
    }

    fn parse_compare_op(&mut self, line: u32) -> PResult<CompareOp> {
        self.skip_trivia();
        let first = self.bump();
        let op = match (first, self.peek()) {
            (Some('='), Some('=')) => {
                self.bump();
                CompareOp::Eq
            }
            (Some('!'), Some('=')) => {
                self.bump();
                CompareOp::Ne
            }
            (Some('<'), Some('=')) => {
                self.bump();
                CompareOp::Le
            }
            (Some('>'), Some('=')) => {
                self.bump();
                CompareOp::Ge
            }
            (Some('<'), _) => CompareOp::Lt,
            (Some('>'), _) => CompareOp::Gt,
            _ => {
                self.error(line, "expected comparison operator");
                return Err(());
            }
        };
        Ok(op)
    }

    fn check_declared(&mut self, identifier: &str, declared: &[String], line: u32) -> PResult<()> {
        if declared.iter().any(|d| d == identifier) {
            Ok(())
        } else {
            self.error(line, format!("undefined string {}", identifier));
            Err(())
        }
    }

    // Character-level helpers.

    fn at_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.chars.get(self.pos + 1) == Some(&'/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.chars.get(self.pos + 1) == Some(&'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            None => return,
                            _ => {}
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn read_ident(&mut self) -> Result<String, ()> {
        self.skip_trivia();
        let mut ident = String::new();
        match self.peek() {
            Some(c) if c.is_alphabetic() || c == '_' => {}
            _ => return Err(()),
        }
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(ident)
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        let line = self.line;
        self.read_ident().map_err(|_| {
            self.error(line, format!("expected {}", what));
        })
    }

    fn expect_char(&mut self, expected: char) -> PResult<()> {
        self.skip_trivia();
        let line = self.line;
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            found => {
                let found = found.map(|c| c.to_string()).unwrap_or_else(|| "end of file".to_string());
                self.error(line, format!("expected '{}', found '{}'", expected, found));
                Err(())
            }
        }
    }

    fn try_keyword(&mut self, keyword: &str) -> bool {
        let save = (self.pos, self.line);
        if let Ok(word) = self.read_ident() {
            if word == keyword {
                return true;
            }
        }
        self.pos = save.0;
        self.line = save.1;
        false
    }

    fn expect_keyword(&mut self, keyword: &str, line: u32) -> PResult<()> {
        if self.try_keyword(keyword) {
            Ok(())
        } else {
            self.error(line, format!("expected '{}'", keyword));
            Err(())
        }
    }

    fn expect_int(&mut self) -> PResult<i64> {
        self.skip_trivia();
        let line = self.line;
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if digits.is_empty() {
            self.error(line, "expected integer");
            return Err(());
        }
        digits.parse::<i64>().map_err(|_| {
            self.error(line, format!("integer '{}' out of range", digits));
        })
    }

    /// Reads a quoted literal as raw bytes. `\xNN` contributes the byte NN
    /// verbatim, never a UTF-8 re-encoding, so high-byte patterns match the
    /// bytes the rule author wrote.
    fn expect_string_literal(&mut self) -> PResult<Vec<u8>> {
        self.skip_trivia();
        let line = self.line;
        if self.peek() != Some('"') {
            self.error(line, "expected string literal");
            return Err(());
        }
        self.bump();

        let mut value = Vec::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('"') => value.push(b'"'),
                    Some('\\') => value.push(b'\\'),
                    Some('n') => value.push(b'\n'),
                    Some('t') => value.push(b'\t'),
                    Some('r') => value.push(b'\r'),
                    Some('x') => {
                        let hi = self.bump();
                        let lo = self.bump();
                        match (hi.and_then(|c| c.to_digit(16)), lo.and_then(|c| c.to_digit(16))) {
                            (Some(h), Some(l)) => {
                                value.push((h * 16 + l) as u8);
                            }
                            _ => {
                                self.error(line, "invalid \\x escape");
                                return Err(());
                            }
                        }
                    }
                    Some(other) => {
                        self.error(line, format!("invalid escape '\\{}'", other));
                        return Err(());
                    }
                    None => {
                        self.error(line, "unterminated string literal");
                        return Err(());
                    }
                },
                Some('\n') | None => {
                    self.error(line, "unterminated string literal");
                    return Err(());
                }
                Some(c) => {
                    let mut buf = [0u8; 4];
                    value.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }

    /// Quoted literal in a position that must be text (import and include
    /// names, meta values).
    fn expect_text_literal(&mut self) -> PResult<String> {
        let line = self.line;
        let bytes = self.expect_string_literal()?;
        String::from_utf8(bytes).map_err(|_| {
            self.error(line, "string literal must be valid UTF-8 here");
        })
    }

    /// Skips ahead to the next top-level rule after a fatal error. Brace
    /// depth is tracked relative to the error point; string literals and
    /// comments are skipped whole so braces inside them don't miscount.
    fn synchronize(&mut self) {
        let mut depth = 0usize;
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return,
                Some('"') => {
                    let _ = self.expect_string_literal();
                }
                Some('{') => {
                    depth += 1;
                    self.bump();
                }
                Some('}') => {
                    self.bump();
                    if depth <= 1 {
                        return;
                    }
                    depth -= 1;
                }
                Some(c) if (c.is_alphabetic() || c == '_') && depth == 0 => {
                    let save = (self.pos, self.line);
                    if let Ok(word) = self.read_ident() {
                        if word == "rule" || word == "private" || word == "global"
                            || word == "import" || word == "include"
                        {
                            self.pos = save.0;
                            self.line = save.1;
                            return;
                        }
                    }
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(&self.label, line, message));
    }

    fn warning(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::warning(&self.label, line, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::diagnostics::Severity;

    fn parse(text: &str) -> ParseOutput {
        let externals = HashMap::new();
        let mut resolver = |_: &str, path: &str| -> std::io::Result<String> {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                path.to_string(),
            ))
        };
        parse_source(text, "<source>", "default", &externals, &mut resolver)
    }

    #[test]
    fn test_parse_full_rule() {
        let out = parse(
            r#"
            import "pe"
            rule HelloWorld : Hello World
            {
                meta:
                    my_identifier_1 = "Some string data"
                    my_identifier_2 = 24
                    my_identifier_3 = true
                strings:
                    $a = "Hello world"
                    $b = { 48 65 6c 6c 6f }
                condition:
                    any of them
            }
            "#,
        );

        assert!(out.diagnostics.iter().all(|d| !d.is_error()), "{:?}", out.diagnostics);
        assert_eq!(out.imports, vec!["pe"]);
        assert_eq!(out.rules.len(), 1);

        let rule = &out.rules[0].rule;
        assert_eq!(rule.identifier, "HelloWorld");
        assert_eq!(rule.tags, vec!["Hello", "World"]);
        assert_eq!(rule.metas.len(), 3);
        assert_eq!(rule.metas[0].value, MetaValue::String("Some string data".to_string()));
        assert_eq!(rule.metas[1].value, MetaValue::Integer(24));
        assert_eq!(rule.metas[2].value, MetaValue::Boolean(true));
        assert_eq!(rule.strings.len(), 2);
        assert_eq!(rule.referenced, vec!["$a", "$b"]);
        assert!(matches!(
            rule.condition,
            Condition::Of {
                quantifier: Quantifier::Any,
                set: StringSet::Them,
            }
        ));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let out = parse("rule Broken {\n  condition:\n    $missing\n}");
        assert!(out.diagnostics.iter().any(|d| d.is_error()));
        let err = out.diagnostics.iter().find(|d| d.is_error()).unwrap();
        assert_eq!(err.line, 3);
        assert_eq!(err.source, "<source>");
        assert!(err.message.contains("$missing"));
    }

    #[test]
    fn test_recovers_after_bad_rule() {
        let out = parse(
            r#"
            rule Bad { condition: what_is_this }
            rule Good { condition: true }
            "#,
        );
        assert!(out.diagnostics.iter().any(|d| d.is_error()));
        assert_eq!(out.rules.len(), 1);
        assert_eq!(out.rules[0].rule.identifier, "Good");
        assert_eq!(out.rules[0].line, 3);
    }

    #[test]
    fn test_unreferenced_string_warns() {
        let out = parse(
            r#"
            rule Lonely {
                strings:
                    $used = "a"
                    $unused = "b"
                condition:
                    $used
            }
            "#,
        );
        let warnings: Vec<_> = out
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("$unused"));
        assert_eq!(out.rules.len(), 1);
    }

    #[test]
    fn test_string_modifiers() {
        let out = parse(
            r#"
            rule Mods {
                strings:
                    $a = "abc" nocase wide ascii fullword
                condition:
                    $a
            }
            "#,
        );
        let def = &out.rules[0].rule.strings[0];
        assert!(def.modifiers.contains(StringModifiers::NOCASE));
        assert!(def.modifiers.contains(StringModifiers::WIDE));
        assert!(def.modifiers.contains(StringModifiers::ASCII));
        assert!(def.modifiers.contains(StringModifiers::FULLWORD));
    }

    #[test]
    fn test_hex_with_wildcards() {
        let out = parse(
            r#"
            rule Hexy {
                strings:
                    $h = { 48 ?? 6C 6f }
                condition:
                    $h
            }
            "#,
        );
        assert!(out.diagnostics.iter().all(|d| !d.is_error()));
        match &out.rules[0].rule.strings[0].kind {
            StringKind::Hex(pattern) => {
                assert_eq!(pattern.bytes(), &[0x48, 0x00, 0x6C, 0x6F]);
                assert_eq!(pattern.mask(), &[true, false, true, true]);
            }
            other => panic!("expected hex string, got {:?}", other),
        }
    }

    #[test]
    fn test_regex_string() {
        let out = parse(
            r#"
            rule Rgx {
                strings:
                    $r = /http:\/\/[a-z]+/
                condition:
                    $r
            }
            "#,
        );
        assert!(out.diagnostics.iter().all(|d| !d.is_error()), "{:?}", out.diagnostics);
        match &out.rules[0].rule.strings[0].kind {
            StringKind::Regex { source, .. } => assert_eq!(source, "http:\\/\\/[a-z]+"),
            other => panic!("expected regex string, got {:?}", other),
        }
    }

    #[test]
    fn test_condition_operators() {
        let out = parse(
            r#"
            rule Ops {
                strings:
                    $a = "a"
                    $b = "b"
                condition:
                    ($a and not $b) or #a >= 2 or 1 of ($a, $b)
            }
            "#,
        );
        assert!(out.diagnostics.iter().all(|d| !d.is_error()), "{:?}", out.diagnostics);
        assert_eq!(out.rules[0].rule.referenced, vec!["$a", "$b"]);
    }

    #[test]
    fn test_private_global_qualifiers() {
        let out = parse("private global rule Q { condition: false }");
        assert!(out.diagnostics.iter().all(|d| !d.is_error()));
        assert!(out.rules[0].rule.is_private);
        assert!(out.rules[0].rule.is_global);
    }

    #[test]
    fn test_include_not_found_is_error() {
        let out = parse("include \"missing.yar\"\nrule R { condition: true }");
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.is_error() && d.message.contains("missing.yar")));
        assert_eq!(out.rules.len(), 1);
    }

    #[test]
    fn test_include_resolution() {
        let externals = HashMap::new();
        let mut resolver = |_: &str, path: &str| -> std::io::Result<String> {
            assert_eq!(path, "extra.yar");
            Ok("rule Included { condition: true }".to_string())
        };
        let out = parse_source(
            "include \"extra.yar\"\nrule Main { condition: true }",
            "<source>",
            "default",
            &externals,
            &mut resolver,
        );
        assert!(out.diagnostics.is_empty());
        let names: Vec<_> = out.rules.iter().map(|r| r.rule.identifier.as_str()).collect();
        assert_eq!(names, vec!["Included", "Main"]);
        // Included rules carry their own source label in diagnostics.
    }

    #[test]
    fn test_externals_in_condition() {
        let mut externals = HashMap::new();
        externals.insert("ext_var".to_string(), ExternalValue::Boolean(true));
        let mut resolver =
            |_: &str, _: &str| -> std::io::Result<String> { unreachable!("no includes") };
        let out = parse_source(
            "rule E { condition: ext_var }",
            "<source>",
            "default",
            &externals,
            &mut resolver,
        );
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(out.rules[0].rule.condition, Condition::External("ext_var".to_string()));
    }

    #[test]
    fn test_string_escapes() {
        let out = parse(
            "rule Esc { strings: $a = \"tab\\there\\x41\" condition: $a }",
        );
        assert!(out.diagnostics.iter().all(|d| !d.is_error()), "{:?}", out.diagnostics);
        match &out.rules[0].rule.strings[0].kind {
            StringKind::Text { value } => assert_eq!(value.as_slice(), b"tab\there\x41"),
            other => panic!("expected text string, got {:?}", other),
        }
    }

    #[test]
    fn test_high_byte_escapes_stay_raw() {
        let out = parse("rule Hb { strings: $a = \"\\xff\\xfe\" condition: $a }");
        assert!(out.diagnostics.iter().all(|d| !d.is_error()), "{:?}", out.diagnostics);
        match &out.rules[0].rule.strings[0].kind {
            StringKind::Text { value } => assert_eq!(value.as_slice(), &[0xFF, 0xFE]),
            other => panic!("expected text string, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_text_string_is_fatal() {
        let out = parse("rule E { strings: $a = \"\" condition: $a }");
        assert!(out
            .diagnostics
            .iter()
            .any(|d| d.is_error() && d.message.contains("empty")));
        assert!(out.rules.is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        let out = parse(
            r#"
            // leading comment
            rule C { /* inline */ condition: true // trailing
            }
            "#,
        );
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.rules.len(), 1);
    }
}
