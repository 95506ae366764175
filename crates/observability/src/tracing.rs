//! Tracing/logging initialization.
//!
//! JSON lines with timestamps; the filter comes from `RUST_LOG` or an explicit
//! directive. Stock and order operations log through `tracing` spans, so the
//! product ids, order numbers and quantities of each call land as JSON fields.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Initialize tracing/logging for the process from `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

/// Initialize tracing with `directive`; an unparsable directive falls back to `info`.
pub fn init_with_filter(directive: &str) {
    install(filter_from(directive));
}

fn filter_from(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn install(filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_a_no_op() {
        init_with_filter("motoshop_infra=debug,warn");
        init();
        init_with_filter("info");
    }

    #[test]
    fn invalid_directive_falls_back_to_default() {
        assert!(EnvFilter::try_new("motoshop_infra=notalevel").is_err());
        assert_eq!(
            filter_from("motoshop_infra=notalevel").to_string(),
            filter_from(DEFAULT_FILTER).to_string()
        );
    }
}
