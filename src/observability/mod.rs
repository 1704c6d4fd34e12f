//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing via tracing-subscriber
//! - OpenTelemetry metrics for accepts, handoffs and credit

pub mod metrics;
pub mod tracing;
