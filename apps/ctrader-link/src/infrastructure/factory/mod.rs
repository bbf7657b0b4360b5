//! Client Factory
//!
//! Wires the protobuf codec, the Prometheus recorder and a concrete
//! transport into a [`Client`]. The application layer only sees the ports;
//! this is where the adapters are chosen.
//!
//! ```text
//! ClientConfig ──► connect() ─┬─► websocket_client() ─► WebSocketTransport (dials in background)
//!                             └─► tcp_client()       ─► TcpTransport (connected up front)
//! ```
//!
//! Every client built here sends heartbeat probes and runs its receive loop
//! inside a [`connection_span`].

use std::sync::Arc;

use crate::application::ports::{FrameKind, ProbeBuilder, Transport, TransportError};
use crate::application::services::{Client, CorrelationEngine};
use crate::domain::credentials::Credentials;
use crate::domain::envelope::Envelope;
use crate::infrastructure::codec::EnvelopeCodec;
use crate::infrastructure::config::{ClientConfig, Endpoint, TransportSettings};
use crate::infrastructure::metrics::{PrometheusMetrics, TransportKind};
use crate::infrastructure::telemetry::connection_span;
use crate::infrastructure::transport::{
    TcpTransport, TcpTransportConfig, WebSocketTransport, WebSocketTransportConfig,
};

/// Correlation engine speaking protobuf envelopes and recording to Prometheus.
#[must_use]
pub fn engine() -> CorrelationEngine {
    CorrelationEngine::new(Arc::new(EnvelopeCodec::new())).with_metrics(Arc::new(PrometheusMetrics))
}

/// Heartbeat builder: an encoded `HEARTBEAT_EVENT` envelope.
#[must_use]
pub fn heartbeat_frame() -> ProbeBuilder {
    let codec = EnvelopeCodec::new();
    Arc::new(move || (FrameKind::Binary, codec.encode_envelope(&Envelope::heartbeat())))
}

/// Bind a client to an existing transport.
///
/// The receive loop is not started and no heartbeat is installed.
#[must_use]
pub fn client_with_transport(transport: Arc<dyn Transport>, credentials: Credentials) -> Client {
    Client::new(engine(), transport, credentials)
}

/// Create a client on a persistent WebSocket connection.
///
/// Installs the heartbeat probe and starts the receive loop, which dials
/// in the background. Must be called within a Tokio runtime.
#[must_use]
pub fn websocket_client(
    url: impl Into<String>,
    credentials: Credentials,
    settings: &TransportSettings,
) -> Client {
    let url = url.into();
    let span = connection_span(TransportKind::WebSocket, &url);

    let config = WebSocketTransportConfig::from_transport_settings(url, settings);
    let transport = Arc::new(WebSocketTransport::new(config));
    transport.set_heartbeat(settings.heartbeat_interval, heartbeat_frame());

    let client = client_with_transport(transport, credentials);
    client.spawn_listen_in(span);
    client
}

/// Create a client on a length-prefixed TCP connection.
///
/// # Errors
///
/// Returns an error if the TCP connection cannot be established.
pub async fn tcp_client(
    addr: impl Into<String>,
    credentials: Credentials,
    settings: &TransportSettings,
) -> Result<Client, TransportError> {
    let addr = addr.into();
    let span = connection_span(TransportKind::Tcp, &addr);

    let config = TcpTransportConfig::from_transport_settings(addr, settings);
    let transport = Arc::new(TcpTransport::connect(config).await?);
    transport.set_heartbeat(settings.heartbeat_interval, heartbeat_frame());

    let client = client_with_transport(transport, credentials);
    client.spawn_listen_in(span);
    Ok(client)
}

/// Create a client from a complete configuration.
///
/// # Errors
///
/// Returns an error if a TCP endpoint cannot be reached.
pub async fn connect(config: &ClientConfig) -> Result<Client, TransportError> {
    let credentials = config.credentials.clone();
    let client = match &config.endpoint {
        Endpoint::WebSocket(url) => websocket_client(url.clone(), credentials, &config.transport),
        Endpoint::Tcp(addr) => tcp_client(addr.clone(), credentials, &config.transport).await?,
    };
    Ok(client.with_request_timeout(config.request_timeout))
}
