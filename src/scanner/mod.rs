// Thu Jan 29 2026 - Alex

//! Scan execution.
//!
//! A `Scanner` binds one scanning session to a compiled rule set. It is
//! configured before a scan (timeout, max reported rules, negate mode,
//! module data) and reusable across scans with the same configuration. One
//! scanner runs one scan at a time (`&mut self`); concurrent scans need
//! separate scanners over the same `CompiledRules`.
//!
//! The callback runs inline on the scanning thread, once per reportable
//! rule, in rule declaration order. Its return value decides whether the
//! scan continues, stops early (a normal termination), or aborts (an
//! error surfaced to the `scan` caller).

pub mod matcher;

use crate::engine::ErrorCode;
use crate::errors::{Error, Result};
use crate::results::{Match, Meta, Rule, StringMatches};
use crate::rules::condition::EvalContext;
use crate::rules::ruleset::{CompiledRule, RuleSet};
use indexmap::IndexMap;
use log::{debug, trace};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::Weak;
use std::time::{Duration, Instant};

/// Decision returned by the scan callback after each reported rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    /// Keep scanning.
    Continue,
    /// Stop now; `scan` returns success without reporting further rules.
    Stop,
    /// Treat the callback as failed; `scan` returns an abort error.
    Abort,
}

/// Receives one owned `Rule` per reportable rule, inline on the scanning
/// thread.
pub trait ScanCallback {
    fn on_rule(&mut self, rule: Rule) -> CallbackResult;
}

impl<F> ScanCallback for F
where
    F: FnMut(Rule) -> CallbackResult,
{
    fn on_rule(&mut self, rule: Rule) -> CallbackResult {
        self(rule)
    }
}

/// Declarative scanner configuration, applied in one call. All fields are
/// optional with the same defaults as a fresh scanner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Wall-clock budget in seconds; 0 means unlimited, negative is a
    /// configuration error.
    #[serde(default)]
    pub timeout_seconds: i64,
    /// Cap on *reported* rules; 0 means unlimited.
    #[serde(default)]
    pub max_rules: usize,
    /// Report rules whose condition evaluated false instead of true.
    #[serde(default)]
    pub not_satisfied_only: bool,
    /// Opaque per-module inputs, keyed by module name.
    #[serde(default)]
    pub module_data: IndexMap<String, String>,
}

/// One scanning session over a compiled rule set.
#[derive(Debug)]
pub struct Scanner {
    rules: Weak<RuleSet>,
    timeout: Option<Duration>,
    max_rules: usize,
    not_satisfied_only: bool,
    module_data: IndexMap<String, String>,
}

impl Scanner {
    pub(crate) fn new(rules: Weak<RuleSet>) -> Self {
        Self {
            rules,
            timeout: None,
            max_rules: 0,
            not_satisfied_only: false,
            module_data: IndexMap::new(),
        }
    }

    /// Wall-clock budget for one scan, in whole seconds. 0 clears the
    /// timeout; a negative value fails fast.
    pub fn set_timeout(&mut self, seconds: i64) -> Result<&mut Self> {
        if seconds < 0 {
            return Err(Error::Configuration(format!(
                "negative scan timeout: {}",
                seconds
            )));
        }
        self.timeout = if seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(seconds as u64))
        };
        Ok(self)
    }

    /// Same as `set_timeout` with sub-second resolution.
    pub fn set_timeout_duration(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Caps the number of reported (not evaluated) rules. 0 is unlimited.
    pub fn set_max_rules(&mut self, max_rules: usize) -> &mut Self {
        self.max_rules = max_rules;
        self
    }

    /// When set, the callback fires for rules whose condition evaluated
    /// false. Only the reporting filter inverts; matching is unchanged.
    pub fn set_not_satisfied_only(&mut self, negate: bool) -> &mut Self {
        self.not_satisfied_only = negate;
        self
    }

    /// Routes an opaque input to a named module. Unknown module names are
    /// ignored at scan time.
    pub fn set_module_data(&mut self, module: &str, value: impl Into<String>) -> &mut Self {
        self.module_data.insert(module.to_string(), value.into());
        self
    }

    /// Applies a whole `ScanConfig` at once.
    pub fn configure(&mut self, config: &ScanConfig) -> Result<&mut Self> {
        self.set_timeout(config.timeout_seconds)?;
        self.max_rules = config.max_rules;
        self.not_satisfied_only = config.not_satisfied_only;
        self.module_data = config.module_data.clone();
        Ok(self)
    }

    /// Scans an in-memory buffer.
    pub fn scan_bytes<C: ScanCallback>(&mut self, data: &[u8], callback: &mut C) -> Result<()> {
        let rules = self.rules.upgrade().ok_or_else(|| {
            Error::Lifecycle("scan on a released compiled rule set".to_string())
        })?;
        self.run_scan(&rules, data, callback)
    }

    /// Scans a file by path, memory-mapped.
    pub fn scan_file<P: AsRef<Path>, C: ScanCallback>(
        &mut self,
        path: P,
        callback: &mut C,
    ) -> Result<()> {
        let file = File::open(path.as_ref())?;
        self.scan_fd(&file, callback)
    }

    /// Scans an already-open file handle, memory-mapped.
    pub fn scan_fd<C: ScanCallback>(&mut self, file: &File, callback: &mut C) -> Result<()> {
        let len = file.metadata()?.len();
        if len == 0 {
            // Zero-length maps are rejected by the OS; an empty buffer
            // scans the same content.
            return self.scan_bytes(&[], callback);
        }
        let mmap = unsafe { Mmap::map(file) }?;
        self.scan_bytes(&mmap, callback)
    }

    fn run_scan<C: ScanCallback>(
        &self,
        rules: &RuleSet,
        data: &[u8],
        callback: &mut C,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);

        for (module, value) in &self.module_data {
            if rules.imports().iter().any(|i| i == module) {
                debug!("module '{}' input: {}", module, value);
            } else {
                trace!("ignoring data for unknown module '{}'", module);
            }
        }

        let mut reported = 0usize;
        for rule in rules.rules() {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(ErrorCode::ScanTimeout
                        .into_error(&rule.qualified_name(), self.timeout));
                }
            }

            let ctx = matcher::collect_rule_matches(rule, data)?;
            let declared: Vec<String> =
                rule.strings.iter().map(|s| s.identifier.clone()).collect();
            let satisfied = rule.condition.evaluate(&EvalContext::new(
                &declared,
                ctx.counts(),
                rules.externals(),
            ));

            if satisfied == self.not_satisfied_only {
                continue;
            }

            trace!(
                "reporting rule {} (satisfied: {})",
                rule.qualified_name(),
                satisfied
            );
            match callback.on_rule(build_report(rule, &ctx, data)) {
                CallbackResult::Continue => {
                    reported += 1;
                    if self.max_rules > 0 && reported >= self.max_rules {
                        debug!("max-rules cap reached ({})", self.max_rules);
                        return Ok(());
                    }
                }
                CallbackResult::Stop => {
                    debug!("callback requested early stop");
                    return Ok(());
                }
                CallbackResult::Abort => {
                    return Err(ErrorCode::CallbackError
                        .into_error(&rule.qualified_name(), None));
                }
            }
        }

        debug!(
            "scan complete: {} byte(s), {} rule(s) reported in {:?}",
            data.len(),
            reported,
            started.elapsed()
        );
        Ok(())
    }
}

/// Deep-copies everything the callback may want to keep: tags, metadata,
/// and per-string matches with raw bytes and display text.
fn build_report(rule: &CompiledRule, ctx: &matcher::RuleMatchContext, data: &[u8]) -> Rule {
    let metas = rule
        .metas
        .iter()
        .map(|m| Meta::new(m.identifier.clone(), m.value.clone()))
        .collect();

    let strings = ctx
        .hits()
        .iter()
        .map(|(identifier, raw_matches)| {
            let def = rule.string(identifier);
            let matches = raw_matches
                .iter()
                .map(|raw| {
                    let bytes = data[raw.offset..raw.offset + raw.len].to_vec();
                    let text = def
                        .map(|d| d.render_text(&bytes))
                        .unwrap_or_else(|| crate::results::decode_text(&bytes));
                    Match::new(raw.offset as u64, bytes, text)
                })
                .collect();
            StringMatches::new(identifier.clone(), matches)
        })
        .collect();

    Rule::new(
        rule.identifier.clone(),
        rule.namespace.clone(),
        rule.tags.clone(),
        metas,
        strings,
    )
}
