// Wed Jan 28 2026 - Alex

use crate::errors::Error;
use std::time::Duration;

/// Raw status codes used inside the matching engine. They never cross the
/// facade boundary: every non-success code is translated into a structured
/// `Error` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    InsufficientMemory = 1,
    ScanTimeout = 2,
    TooManyMatches = 3,
    CallbackError = 4,
    CorruptArtifact = 5,
    InternalFatal = 6,
}

impl ErrorCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Translates a failing code into the facade error taxonomy. `context`
    /// names the operation or resource the code came from.
    pub fn into_error(self, context: &str, timeout: Option<Duration>) -> Error {
        match self {
            ErrorCode::Success => Error::Internal(format!(
                "success code translated as error in {}",
                context
            )),
            ErrorCode::ScanTimeout => Error::Timeout(timeout.unwrap_or_default()),
            ErrorCode::TooManyMatches => {
                Error::Aborted(format!("too many matches in {}", context))
            }
            ErrorCode::CallbackError => {
                Error::Aborted(format!("callback failed in {}", context))
            }
            ErrorCode::CorruptArtifact => {
                Error::Configuration(format!("corrupt compiled artifact: {}", context))
            }
            ErrorCode::InsufficientMemory | ErrorCode::InternalFatal => {
                Error::Internal(format!("engine failure ({:?}) in {}", self, context))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_kinds() {
        let timeout = ErrorCode::ScanTimeout.into_error("scan", Some(Duration::from_secs(5)));
        assert!(timeout.is_timeout());

        assert!(matches!(
            ErrorCode::TooManyMatches.into_error("scan", None),
            Error::Aborted(_)
        ));
        assert!(matches!(
            ErrorCode::CorruptArtifact.into_error("load", None),
            Error::Configuration(_)
        ));
        assert!(matches!(
            ErrorCode::InternalFatal.into_error("scan", None),
            Error::Internal(_)
        ));
    }

    #[test]
    fn test_success_is_not_an_error_source() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::ScanTimeout.is_success());
    }
}
