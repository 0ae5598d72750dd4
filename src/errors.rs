// Mon Jan 26 2026 - Alex

use crate::compiler::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Everything the facade can fail with. Engine-internal status codes never
/// leak past this type; see `engine::codes` for the translation boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Compilation failed with {} diagnostic(s)", .0.len())]
    Compilation(Vec<Diagnostic>),
    #[error("Scan timed out after {0:?}")]
    Timeout(Duration),
    #[error("Scan aborted: {0}")]
    Aborted(String),
    #[error("Content unreadable: {0}")]
    InvalidContent(#[from] std::io::Error),
    #[error("Resource lifecycle violation: {0}")]
    Lifecycle(String),
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl Error {
    /// Diagnostics attached to a compilation failure, empty for other kinds.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::Compilation(diags) => diags,
            _ => &[],
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::Lifecycle(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
