// Tue Jan 27 2026 - Alex

//! Compiled rule artifacts.
//!
//! `CompiledRules` is the immutable product of a successful
//! `Compiler::build`. It can back any number of scanners (including across
//! threads) and is explicitly released; scanners hold a weak reference, so
//! using one after release fails with a lifecycle error instead of reading
//! freed state.

pub mod condition;
pub mod pattern;
pub mod ruleset;

pub use condition::{CompareOp, Condition, EvalContext, ExternalValue, Quantifier, StringSet};
pub use pattern::BytePattern;
pub use ruleset::{CompiledRule, MetaDef, RawMatch, RuleSet, StringDef, StringKind, StringModifiers};

use crate::errors::{Error, Result};
use crate::scanner::Scanner;
use log::debug;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// The immutable, reusable compiled rule set.
#[derive(Debug)]
pub struct CompiledRules {
    inner: Option<Arc<RuleSet>>,
}

impl CompiledRules {
    pub(crate) fn new(set: RuleSet) -> Self {
        Self {
            inner: Some(Arc::new(set)),
        }
    }

    fn inner(&self) -> Result<&Arc<RuleSet>> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::Lifecycle("compiled rules already released".to_string()))
    }

    pub fn rule_count(&self) -> Result<usize> {
        Ok(self.inner()?.rule_count())
    }

    /// Qualified `namespace:identifier` names in declaration order.
    pub fn rule_names(&self) -> Result<Vec<String>> {
        Ok(self
            .inner()?
            .rules()
            .iter()
            .map(CompiledRule::qualified_name)
            .collect())
    }

    /// Creates a scanner over this rule set. The scanner does not keep the
    /// rules alive; releasing the rules invalidates every scanner built from
    /// them.
    pub fn scanner(&self) -> Result<Scanner> {
        Ok(Scanner::new(Arc::downgrade(self.inner()?)))
    }

    /// Releases the artifact. A second release is a usage error.
    pub fn release(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(set) => {
                debug!("released compiled rules ({} rules)", set.rule_count());
                Ok(())
            }
            None => Err(Error::Lifecycle(
                "compiled rules released twice".to_string(),
            )),
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Serializes the artifact as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.save_to(BufWriter::new(file))
    }

    pub fn save_to<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self.inner()?.as_ref())
            .map_err(|e| Error::Internal(format!("serialize compiled rules: {}", e)))
    }

    /// Loads a previously saved artifact and revalidates it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::load_from(BufReader::new(file))
    }

    pub fn load_from<R: Read>(reader: R) -> Result<Self> {
        let set: RuleSet = serde_json::from_reader(reader)
            .map_err(|e| Error::Configuration(format!("invalid compiled rules artifact: {}", e)))?;
        set.validate()?;
        Ok(Self::new(set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn tiny_set() -> RuleSet {
        RuleSet::new(
            vec![CompiledRule {
                identifier: "Tiny".to_string(),
                namespace: "default".to_string(),
                tags: vec![],
                metas: vec![],
                strings: vec![],
                condition: Condition::Boolean(true),
                referenced: vec![],
                is_private: false,
                is_global: false,
            }],
            HashMap::new(),
            vec![],
        )
    }

    #[test]
    fn test_release_twice_is_lifecycle_error() {
        let mut rules = CompiledRules::new(tiny_set());
        rules.release().unwrap();
        assert!(rules.is_released());
        assert!(matches!(rules.release(), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_use_after_release_fails() {
        let mut rules = CompiledRules::new(tiny_set());
        rules.release().unwrap();
        assert!(matches!(rules.rule_count(), Err(Error::Lifecycle(_))));
        assert!(matches!(rules.scanner(), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let rules = CompiledRules::new(tiny_set());
        let mut buf = Vec::new();
        rules.save_to(&mut buf).unwrap();

        let loaded = CompiledRules::load_from(buf.as_slice()).unwrap();
        assert_eq!(loaded.rule_count().unwrap(), 1);
        assert_eq!(loaded.rule_names().unwrap(), vec!["default:Tiny"]);
    }

    #[test]
    fn test_load_garbage_fails() {
        let err = CompiledRules::load_from(&b"not json"[..]).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
