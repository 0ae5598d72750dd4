// Wed Jan 28 2026 - Alex

//! Process-wide engine capability.
//!
//! `Engine::open` acquires the capability and `close` releases it; holders
//! are reference-counted, so independent components may each hold their own
//! handle. Closing twice is a usage error, never a silent no-op, and every
//! factory method on a closed handle fails with a lifecycle error.

pub mod codes;

pub use codes::ErrorCode;

use crate::compiler::Compiler;
use crate::errors::{Error, Result};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

static OPEN_HANDLES: Lazy<Mutex<usize>> = Lazy::new(|| Mutex::new(0));

/// A handle on the process-wide scanning engine.
#[derive(Debug)]
pub struct Engine {
    open: bool,
}

impl Engine {
    /// Acquires the engine capability. May be called from any number of
    /// holders; the process-wide state lives until the last close.
    pub fn open() -> Result<Self> {
        let mut count = OPEN_HANDLES.lock();
        *count += 1;
        debug!("engine opened ({} handle(s) now open)", *count);
        Ok(Self { open: true })
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of handles currently open process-wide.
    pub fn open_handle_count() -> usize {
        *OPEN_HANDLES.lock()
    }

    /// Creates a fresh single-use compiler.
    pub fn compiler<'cb>(&self) -> Result<Compiler<'cb>> {
        self.check_open("create compiler")?;
        Ok(Compiler::new())
    }

    /// Releases the handle. Exactly one close per successful open; a second
    /// close is a lifecycle error so misuse shows up in tests.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::Lifecycle("engine handle closed twice".to_string()));
        }
        self.open = false;
        let mut count = OPEN_HANDLES.lock();
        *count = count.saturating_sub(1);
        debug!("engine closed ({} handle(s) remain)", *count);
        Ok(())
    }

    fn check_open(&self, operation: &str) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::Lifecycle(format!(
                "{} on closed engine handle",
                operation
            )))
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Dropping an open handle releases the refcount; only explicit
        // double-close is treated as misuse.
        if self.open {
            self.open = false;
            let mut count = OPEN_HANDLES.lock();
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_lifecycle() {
        let mut engine = Engine::open().unwrap();
        assert!(engine.is_open());
        engine.close().unwrap();
        assert!(!engine.is_open());
        assert!(matches!(engine.close(), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_compiler_from_closed_handle_fails() {
        let mut engine = Engine::open().unwrap();
        engine.close().unwrap();
        assert!(matches!(engine.compiler(), Err(Error::Lifecycle(_))));
    }

    #[test]
    fn test_multiple_holders() {
        let mut first = Engine::open().unwrap();
        let mut second = Engine::open().unwrap();
        assert!(first.compiler().is_ok());
        assert!(second.compiler().is_ok());
        first.close().unwrap();
        // The second holder is unaffected by the first closing.
        assert!(second.compiler().is_ok());
        second.close().unwrap();
    }
}
