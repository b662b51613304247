//! # Observability
//!
//! Prometheus metrics collection. Logging goes through `tracing`, configured
//! at startup by `runtime::initialization`.

pub mod metrics;

// Re-export for convenience
pub use metrics::*;
