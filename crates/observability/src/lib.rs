//! Tracing and structured logging setup shared by every motoshop process.

/// Initialize process-wide tracing with the `RUST_LOG` filter (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide tracing with an explicit filter directive,
/// e.g. the `log_filter` value of the engine configuration.
pub fn init_with_filter(directive: &str) {
    tracing::init_with_filter(directive);
}

/// Subscriber construction (filters, JSON formatting).
pub mod tracing;
