//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the correlation engine and the ports it drives:
//! transport, envelope format and metrics.

/// Port interfaces for external systems (transports, codec, metrics).
pub mod ports;

/// Application services: the correlation client.
pub mod services;
