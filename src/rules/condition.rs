// Mon Jan 26 2026 - Alex

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Value bound to an external variable at compile time via
/// `Compiler::define_variable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExternalValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl ExternalValue {
    /// Truthiness when the variable is used as a bare condition term.
    pub fn is_truthy(&self) -> bool {
        match self {
            ExternalValue::Boolean(b) => *b,
            ExternalValue::Integer(i) => *i != 0,
            ExternalValue::String(s) => !s.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn apply(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// `them` or an explicit string-reference list in an of-expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringSet {
    Them,
    List(Vec<String>),
}

/// Quantifier of an of-expression. `AtLeast(n)` is the `N of ...` form and
/// matches when at least `n` of the referenced strings have matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantifier {
    Any,
    All,
    AtLeast(u64),
}

/// Compiled rule condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Boolean(bool),
    /// `$a` — true when the string has at least one match.
    StringRef(String),
    /// `any/all/N of them` or `... of ($a, $b)`.
    Of {
        quantifier: Quantifier,
        set: StringSet,
    },
    /// `#a OP n` — comparison against a string's match count.
    Count {
        identifier: String,
        op: CompareOp,
        value: i64,
    },
    /// Bare identifier resolved against compile-time external variables.
    External(String),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// Per-scan inputs the evaluator reads: match counts keyed by string
/// identifier (declaration order) and the baked external variables.
pub struct EvalContext<'a> {
    declared: &'a [String],
    counts: &'a HashMap<String, usize>,
    externals: &'a HashMap<String, ExternalValue>,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        declared: &'a [String],
        counts: &'a HashMap<String, usize>,
        externals: &'a HashMap<String, ExternalValue>,
    ) -> Self {
        Self {
            declared,
            counts,
            externals,
        }
    }

    fn count_of(&self, identifier: &str) -> usize {
        self.counts.get(identifier).copied().unwrap_or(0)
    }

    fn set_members(&self, set: &'a StringSet) -> &'a [String] {
        match set {
            StringSet::Them => self.declared,
            StringSet::List(refs) => refs,
        }
    }
}

impl Condition {
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        match self {
            Condition::Boolean(b) => *b,
            Condition::StringRef(identifier) => ctx.count_of(identifier) > 0,
            Condition::Of { quantifier, set } => {
                let members = ctx.set_members(set);
                let satisfied = members
                    .iter()
                    .filter(|ident| ctx.count_of(ident) > 0)
                    .count() as u64;
                match quantifier {
                    Quantifier::Any => satisfied >= 1,
                    Quantifier::All => satisfied == members.len() as u64,
                    Quantifier::AtLeast(n) => satisfied >= *n,
                }
            }
            Condition::Count {
                identifier,
                op,
                value,
            } => op.apply(ctx.count_of(identifier) as i64, *value),
            Condition::External(name) => ctx
                .externals
                .get(name)
                .map(ExternalValue::is_truthy)
                .unwrap_or(false),
            Condition::Not(inner) => !inner.evaluate(ctx),
            Condition::And(lhs, rhs) => lhs.evaluate(ctx) && rhs.evaluate(ctx),
            Condition::Or(lhs, rhs) => lhs.evaluate(ctx) || rhs.evaluate(ctx),
        }
    }

    /// String identifiers the condition references, in declaration order and
    /// without duplicates. `them` references every declared string.
    pub fn referenced_strings(&self, declared: &[String]) -> Vec<String> {
        let mut referenced = Vec::new();
        self.collect_refs(declared, &mut referenced);
        referenced
    }

    fn collect_refs(&self, declared: &[String], out: &mut Vec<String>) {
        let mut push = |ident: &str| {
            if declared.iter().any(|d| d == ident) && !out.iter().any(|o| o == ident) {
                out.push(ident.to_string());
            }
        };

        match self {
            Condition::StringRef(identifier) => push(identifier),
            Condition::Count { identifier, .. } => push(identifier),
            Condition::Of { set, .. } => match set {
                StringSet::Them => {
                    for ident in declared {
                        push(ident);
                    }
                }
                StringSet::List(refs) => {
                    for ident in refs {
                        push(ident);
                    }
                }
            },
            Condition::Not(inner) => inner.collect_refs(declared, out),
            Condition::And(lhs, rhs) | Condition::Or(lhs, rhs) => {
                lhs.collect_refs(declared, out);
                rhs.collect_refs(declared, out);
            }
            Condition::Boolean(_) | Condition::External(_) => {}
        }

        // Re-impose declaration order; nested expressions can visit refs in
        // source order instead.
        out.sort_by_key(|ident| declared.iter().position(|d| d == ident).unwrap_or(usize::MAX));
    }
}
