//! Infrastructure Layer - Adapters and process plumbing.
//!
//! Concrete implementations behind the application layer's ports, plus the
//! process-level concerns: event fan-out, configuration, health endpoints,
//! metrics, and tracing.

/// In-process event bus for bar and tick fan-out.
pub mod bus;

/// Feed adapters (simulated fallback source, source selection policy).
pub mod feed;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
