//! Tracing and logging (shared setup for both services).

/// Initialize process-wide tracing for `service`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(service: &str) {
    tracing::init(service, tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, layers).
pub mod tracing;
