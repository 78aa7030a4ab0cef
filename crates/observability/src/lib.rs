//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing with the default settings (JSON, `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(&tracing::TracingConfig::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;
