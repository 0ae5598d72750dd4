// Thu Jan 29 2026 - Alex

use crate::engine::ErrorCode;
use crate::errors::Result;
use crate::rules::ruleset::{CompiledRule, RawMatch};
use rayon::prelude::*;
use std::collections::HashMap;

/// Upper bound on matches recorded for one string in one scan. Crossing it
/// is treated as an unrecoverable engine failure.
pub const MAX_MATCHES_PER_STRING: usize = 1_000_000;

/// Per-rule match discovery output: raw hits per referenced string, in
/// declaration order, plus a count lookup for condition evaluation.
pub struct RuleMatchContext {
    hits: Vec<(String, Vec<RawMatch>)>,
    counts: HashMap<String, usize>,
}

impl RuleMatchContext {
    pub fn counts(&self) -> &HashMap<String, usize> {
        &self.counts
    }

    pub fn hits(&self) -> &[(String, Vec<RawMatch>)] {
        &self.hits
    }
}

/// Finds every occurrence of the rule's referenced strings in `data`.
///
/// Strings are searched in parallel; the output is keyed by declaration
/// order, so the result is deterministic regardless of scheduling.
pub fn collect_rule_matches(rule: &CompiledRule, data: &[u8]) -> Result<RuleMatchContext> {
    let referenced: Vec<_> = rule
        .referenced
        .iter()
        .filter_map(|ident| rule.string(ident))
        .collect();

    let hits: Vec<(String, Vec<RawMatch>)> = referenced
        .par_iter()
        .map(|def| {
            let matches = def.find_matches(data)?;
            if matches.len() > MAX_MATCHES_PER_STRING {
                return Err(ErrorCode::TooManyMatches
                    .into_error(&format!("string {}", def.identifier), None));
            }
            Ok((def.identifier.clone(), matches))
        })
        .collect::<Result<Vec<_>>>()?;

    let counts = hits
        .iter()
        .map(|(ident, matches)| (ident.clone(), matches.len()))
        .collect();

    Ok(RuleMatchContext { hits, counts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::condition::Condition;
    use crate::rules::pattern::BytePattern;
    use crate::rules::ruleset::{StringDef, StringKind, StringModifiers};

    fn rule_with_strings(strings: Vec<StringDef>, condition: Condition) -> CompiledRule {
        let declared: Vec<String> = strings.iter().map(|s| s.identifier.clone()).collect();
        let referenced = condition.referenced_strings(&declared);
        CompiledRule {
            identifier: "T".to_string(),
            namespace: "default".to_string(),
            tags: vec![],
            metas: vec![],
            strings,
            condition,
            referenced,
            is_private: false,
            is_global: false,
        }
    }

    #[test]
    fn test_hits_keep_declaration_order() {
        let strings = vec![
            StringDef::new(
                "$a".to_string(),
                StringKind::Text {
                    value: b"aa".to_vec(),
                },
                StringModifiers::empty(),
            ),
            StringDef::new(
                "$b".to_string(),
                StringKind::Hex(BytePattern::from_literal(b"bb")),
                StringModifiers::empty(),
            ),
        ];
        let rule = rule_with_strings(
            strings,
            Condition::Or(
                Box::new(Condition::StringRef("$b".to_string())),
                Box::new(Condition::StringRef("$a".to_string())),
            ),
        );

        let ctx = collect_rule_matches(&rule, b"bb aa").unwrap();
        let idents: Vec<_> = ctx.hits().iter().map(|(i, _)| i.as_str()).collect();
        assert_eq!(idents, vec!["$a", "$b"]);
        assert_eq!(ctx.counts()["$a"], 1);
        assert_eq!(ctx.counts()["$b"], 1);
    }

    #[test]
    fn test_unreferenced_strings_not_searched() {
        let strings = vec![
            StringDef::new(
                "$a".to_string(),
                StringKind::Text {
                    value: b"x".to_vec(),
                },
                StringModifiers::empty(),
            ),
            StringDef::new(
                "$dead".to_string(),
                StringKind::Text {
                    value: b"x".to_vec(),
                },
                StringModifiers::empty(),
            ),
        ];
        let rule = rule_with_strings(strings, Condition::StringRef("$a".to_string()));

        let ctx = collect_rule_matches(&rule, b"xxx").unwrap();
        assert_eq!(ctx.hits().len(), 1);
        assert!(!ctx.counts().contains_key("$dead"));
    }
}
