//! # Observability
//!
//! Observability modules for metrics collection.
//!
//! - `metrics`: Prometheus metrics collection

pub mod metrics;

// Re-export for convenience
pub use metrics::*;
