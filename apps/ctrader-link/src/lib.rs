#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::redundant_clone
    )
)]

//! cTrader Link - Correlating Open API Client
//!
//! Multiplexes many concurrent request/response exchanges and a stream of
//! pushed events over a single cTrader Open API connection.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Envelope and correlation token types
//!   - `envelope`: Message type tag, payload, optional correlation token
//!   - `correlation`: Token generation
//!   - `credentials`: Application identity
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `Transport`, `EnvelopeFormat` and `CorrelationMetrics`
//!   - `services`: Correlation engine and client
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `codec`: Protobuf `ProtoMessage` envelope codec
//!   - `transport`: Persistent WebSocket and length-prefixed TCP transports
//!   - `config`: Environment-driven configuration
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry
//!   - `factory`: Builds a `Client` from the adapters above
//!
//! # Data Flow
//!
//! ```text
//! request() ──► Client ──encode──► Transport ──► cTrader
//!                  ▲                   │
//!       reply by   │                   │ inbound frame
//!       token      │                   ▼
//!              CorrelationEngine ◄── dispatch() ──► listeners (by type)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Envelope and correlation types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::correlation::{CorrelationToken, TokenSequence};
pub use domain::credentials::Credentials;
pub use domain::envelope::{ERROR_RES, Envelope, HEARTBEAT_EVENT, MessageType, VERSION_REQ};

// Ports and services
pub use application::ports::{
    CorrelationMetrics, DropReason, EnvelopeFormat, FrameKind, MalformedEnvelope, MessageHandler,
    NoMetrics, ProbeBuilder, Transport, TransportError,
};
pub use application::services::{
    Client, ClientError, CorrelationEngine, DEFAULT_REQUEST_TIMEOUT, EventListener,
};

// Codec
pub use infrastructure::codec::{CodecError, EnvelopeCodec, ProtoMessage};

// Transports
pub use infrastructure::transport::{
    ConnectionState, ReconnectConfig, ReconnectPolicy, TcpTransport, TcpTransportConfig,
    WebSocketTransport, WebSocketTransportConfig,
};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, Endpoint, Environment, TransportChoice,
    TransportSettings,
};

// Metrics
pub use infrastructure::metrics::{PrometheusMetrics, TransportKind, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryGuard, connection_span, init as init_telemetry,
};

// Client construction
pub use infrastructure::factory::{
    client_with_transport, connect, heartbeat_frame, tcp_client, websocket_client,
};
