//! Tracing and logging setup shared by the warehouse binaries.

/// Initialize process-wide tracing with the `info` default.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing configuration (filters, layers).
pub mod tracing;
