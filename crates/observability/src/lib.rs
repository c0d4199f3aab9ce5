//! Process-wide tracing setup shared by ledger binaries.

/// Initialize tracing with the format named by `FUNDLEDGER_LOG_FORMAT`
/// (JSON when unset or unrecognized).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let format: LogFormat = std::env::var(tracing::LOG_FORMAT_VAR)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    tracing::init_with(format);
}

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, ParseLogFormatError, init_with};
