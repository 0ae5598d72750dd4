// Wed Jan 28 2026 - Alex

//! Rule compilation.
//!
//! A `Compiler` accumulates rule sources (text or files, each under an
//! optional namespace), streams diagnostics to a caller-supplied sink, and
//! is consumed by `build()` to produce an immutable `CompiledRules`. The
//! compiler is single-use: `build` takes `self`, so a spent compiler cannot
//! accept further sources.

pub mod diagnostics;
pub mod parser;

pub use diagnostics::{Diagnostic, DiagnosticCallback, Severity};

use crate::errors::{Error, Result};
use crate::rules::condition::ExternalValue;
use crate::rules::ruleset::{CompiledRule, RuleSet};
use crate::rules::CompiledRules;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Label attached to diagnostics from in-memory sources.
pub const IN_MEMORY_LABEL: &str = "<source>";

/// Namespace used when none is given.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Scoped, single-use rule compiler.
pub struct Compiler<'a> {
    rules: Vec<CompiledRule>,
    imports: Vec<String>,
    externals: HashMap<String, ExternalValue>,
    retained: Vec<Diagnostic>,
    callback: Option<DiagnosticCallback<'a>>,
    include_resolver: Box<dyn FnMut(&str, &str) -> std::io::Result<String> + 'a>,
    seen_names: HashSet<(String, String)>,
}

impl<'a> Compiler<'a> {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            imports: Vec::new(),
            externals: HashMap::new(),
            retained: Vec::new(),
            callback: None,
            include_resolver: Box::new(default_include_resolver),
            seen_names: HashSet::new(),
        }
    }

    /// Registers the diagnostic sink. Diagnostics emitted while no sink is
    /// registered are not delivered anywhere (opt-in policy), but they are
    /// always retained internally and attached to a failed `build`.
    pub fn set_diagnostic_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Diagnostic) + 'a,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Replaces the `include` directive resolver. The default reads files
    /// relative to the including source's directory.
    pub fn set_include_resolver<F>(&mut self, resolver: F)
    where
        F: FnMut(&str, &str) -> std::io::Result<String> + 'a,
    {
        self.include_resolver = Box::new(resolver);
    }

    /// Binds an external variable usable in rule conditions. Must be called
    /// before the sources that reference it are added.
    pub fn define_variable(&mut self, name: &str, value: ExternalValue) -> Result<()> {
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(Error::Configuration(format!(
                "invalid external variable name '{}'",
                name
            )));
        }
        self.externals.insert(name.to_string(), value);
        Ok(())
    }

    /// Parses rule text into the accumulating unit. Diagnostics stream to
    /// the registered sink synchronously; fatal ones make the eventual
    /// `build` fail but do not fail this call.
    pub fn add_rules_source(&mut self, text: &str, namespace: Option<&str>) -> Result<()> {
        self.add_labeled_source(text, IN_MEMORY_LABEL, namespace)
    }

    /// Parses a rule file. Diagnostics carry the file path as source label.
    pub fn add_rules_file<P: AsRef<Path>>(&mut self, path: P, namespace: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let label = path.display().to_string();
        self.add_labeled_source(&text, &label, namespace)
    }

    fn add_labeled_source(&mut self, text: &str, label: &str, namespace: Option<&str>) -> Result<()> {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);
        debug!("compiling source '{}' into namespace '{}'", label, namespace);

        let output = parser::parse_source(
            text,
            label,
            namespace,
            &self.externals,
            self.include_resolver.as_mut(),
        );

        for diagnostic in output.diagnostics {
            self.emit(diagnostic);
        }
        self.imports.extend(output.imports);

        for parsed in output.rules {
            let rule = parsed.rule;
            let key = (rule.namespace.clone(), rule.identifier.clone());
            if !self.seen_names.insert(key) {
                let diagnostic = Diagnostic::error(
                    label,
                    parsed.line,
                    format!(
                        "duplicate rule '{}' in namespace '{}'",
                        rule.identifier, rule.namespace
                    ),
                );
                self.emit(diagnostic);
                continue;
            }
            self.rules.push(rule);
        }
        Ok(())
    }

    fn emit(&mut self, diagnostic: Diagnostic) {
        if diagnostic.is_error() {
            warn!("{}", diagnostic);
        }
        if let Some(callback) = self.callback.as_mut() {
            callback(&diagnostic);
        }
        self.retained.push(diagnostic);
    }

    /// True when a fatal diagnostic has been emitted so far.
    pub fn has_errors(&self) -> bool {
        self.retained.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics collected so far, warnings included.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.retained
    }

    /// Finalizes the accumulated sources. Consumes the compiler; fails with
    /// the full diagnostic list when any fatal diagnostic was emitted.
    pub fn build(self) -> Result<CompiledRules> {
        if self.has_errors() {
            return Err(Error::Compilation(self.retained));
        }

        let set = RuleSet::new(self.rules, self.externals, self.imports);
        set.validate()?;
        debug!("compiled {} rule(s)", set.rule_count());
        Ok(CompiledRules::new(set))
    }
}

impl<'a> Default for Compiler<'a> {
    fn default() -> Self {
        Self::new()
    }
}

fn default_include_resolver(including: &str, path: &str) -> std::io::Result<String> {
    let base = Path::new(including)
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();
    let candidate = base.join(path);
    if candidate.exists() {
        std::fs::read_to_string(candidate)
    } else {
        std::fs::read_to_string(path)
    }
}
