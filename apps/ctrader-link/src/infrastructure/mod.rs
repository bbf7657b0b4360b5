//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Protobuf envelope codec.
pub mod codec;

/// WebSocket and TCP transport adapters.
pub mod transport;

/// Environment-driven configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Client construction from concrete adapters.
pub mod factory;
