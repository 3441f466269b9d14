//! Tracing/logging initialization.
//!
//! JSON lines on stdout, filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, or `default_directive` when unset or unparsable.
pub fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops). Returns whether
/// this call installed the subscriber.
pub fn init(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let first = init("debug");
        let second = init("debug");
        assert!(!second || !first);
        ::tracing::info!(check = "after init", "still logs");
    }

    #[test]
    fn falls_back_to_the_default_directive() {
        if std::env::var("RUST_LOG").is_err() {
            let hint = filter("warn").max_level_hint();
            assert_eq!(hint, Some(tracing_subscriber::filter::LevelFilter::WARN));
        }
    }
}
