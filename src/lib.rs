// Mon Jan 26 2026 - Alex

//! Self-contained YARA-subset rule compiler and content scanner.
//!
//! The crate compiles textual signature rules into an immutable
//! [`CompiledRules`] artifact, then runs that artifact against byte content
//! (in-memory buffers, files, or open file handles) through a [`Scanner`],
//! reporting each matched rule to a synchronous callback as an owned
//! [`Rule`] value with tags, metadata, and per-string match offsets.
//!
//! Typical flow:
//!
//! ```no_run
//! use yaralite::{CallbackResult, Engine, Rule};
//!
//! # fn main() -> yaralite::Result<()> {
//! let mut engine = Engine::open()?;
//! let mut compiler = engine.compiler()?;
//! compiler.set_diagnostic_callback(|d| eprintln!("{}", d));
//! compiler.add_rules_source(
//!     r#"rule Greeting { strings: $a = "Hello" condition: $a }"#,
//!     None,
//! )?;
//! let rules = compiler.build()?;
//!
//! let mut scanner = rules.scanner()?;
//! let mut on_rule = |rule: Rule| {
//!     println!("matched {}", rule.identifier());
//!     CallbackResult::Continue
//! };
//! scanner.scan_bytes(b"Hello world", &mut on_rule)?;
//! engine.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Compiled rule sets are immutable and may back any number of scanners,
//! including across threads; scanners hold a non-owning reference, so a
//! released rule set fails scans with a lifecycle error instead of reading
//! freed state. Results handed to the callback are deep copies and outlive
//! the scan.

pub mod compiler;
pub mod engine;
pub mod errors;
pub mod results;
pub mod rules;
pub mod scanner;
pub mod utils;

pub use compiler::{Compiler, Diagnostic, Severity};
pub use engine::Engine;
pub use errors::{Error, Result};
pub use results::{Match, Meta, MetaType, MetaValue, Rule, StringMatches};
pub use rules::{CompiledRules, ExternalValue};
pub use scanner::{CallbackResult, ScanCallback, ScanConfig, Scanner};
