// Tue Jan 27 2026 - Alex

use std::fmt;

/// Severity of a compilation diagnostic. Warnings never block a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One compiler diagnostic: severity, source label (file path or the
/// synthetic in-memory label), 1-based line, and message.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub source: String,
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn error(source: &str, line: u32, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            source: source.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn warning(source: &str, line: u32, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            source: source.to_string(),
            line,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [{}:{}] {}",
            self.severity, self.source, self.line, self.message
        )
    }
}

/// Synchronous sink for diagnostics emitted while sources are added.
pub type DiagnosticCallback<'a> = Box<dyn FnMut(&Diagnostic) + 'a>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let d = Diagnostic::error("<source>", 3, "syntax error");
        assert_eq!(d.to_string(), "error: [<source>:3] syntax error");
        assert!(d.is_error());

        let w = Diagnostic::warning("rules.yar", 10, "string $x never referenced");
        assert!(!w.is_error());
        assert!(w.to_string().starts_with("warning:"));
    }
}
