//! # Observability
//!
//! Prometheus metrics collection. Logging goes through `tracing` and is
//! configured in `runtime::initialization`.

pub mod metrics;

// Re-export for convenience
pub use metrics::*;
