// Thu Jan 29 2026 - Alex

pub mod logging;

pub use logging::LoggingUtils;
