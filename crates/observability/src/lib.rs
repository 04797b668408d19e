//! Process-wide tracing setup shared by binaries and test suites.

pub mod subscriber;

pub use subscriber::{LogFormat, init_with};

/// Initialize tracing with the `info` default filter and the format chosen by
/// `STOCKLEDGER_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init_with("info", LogFormat::from_env());
}
