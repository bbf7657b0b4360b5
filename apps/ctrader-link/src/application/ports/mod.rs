//! Port Interfaces
//!
//! Defines the capabilities the correlation engine depends on.
//! Infrastructure adapters (persistent WebSocket, length-prefixed TCP,
//! protobuf codec, Prometheus recorder) implement them; the engine never
//! names a concrete adapter.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: duplex message transport with heartbeat support
//! - `EnvelopeFormat`: envelope wire encoding
//! - `CorrelationMetrics`: request and dispatch instrumentation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::envelope::{Envelope, MessageType};

/// Kind of frame carried by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Binary frame (every protobuf envelope travels as binary).
    Binary,
    /// Text frame.
    Text,
}

/// Consumer invoked for every inbound message a transport produces.
pub type MessageHandler = Arc<dyn Fn(FrameKind, &[u8]) + Send + Sync>;

/// Builder for heartbeat probe frames, invoked on every heartbeat tick.
pub type ProbeBuilder = Arc<dyn Fn() -> (FrameKind, Vec<u8>) + Send + Sync>;

/// Errors produced by transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No live connection to write to.
    #[error("transport is not connected")]
    NotConnected,

    /// Transport was closed explicitly.
    #[error("transport is closed")]
    Closed,

    /// `listen` was called while a receive loop is already running.
    #[error("transport is already listening")]
    AlreadyListening,

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Reconnection gave up.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    ReconnectExhausted(u32),
}

/// Duplex message transport.
///
/// A single `send` call corresponds to exactly one inbound message on the
/// peer: implementations preserve message boundaries.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one logical message.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no live connection or the write fails.
    async fn send(&self, kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError>;

    /// Register the consumer of inbound messages, replacing any previous one.
    fn on_message(&self, handler: MessageHandler);

    /// Run the receive loop until the transport is closed or fails for good.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection fails and cannot be recovered.
    async fn listen(&self) -> Result<(), TransportError>;

    /// Release all resources. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the underlying socket fails.
    async fn close(&self) -> Result<(), TransportError>;

    /// Configure periodic keep-alive probes. A zero interval disables them.
    ///
    /// Takes effect immediately on a live connection and on every later one.
    fn set_heartbeat(&self, interval: Duration, probe: ProbeBuilder);
}

/// Inbound bytes that do not form an envelope.
#[derive(Debug, thiserror::Error)]
#[error("malformed envelope: {0}")]
pub struct MalformedEnvelope(pub String);

/// Wire encoding of the outer envelope.
pub trait EnvelopeFormat: Send + Sync {
    /// Encode an envelope into one transport message.
    fn encode(&self, envelope: &Envelope) -> Vec<u8>;

    /// Decode one transport message.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not a valid envelope.
    fn decode(&self, data: &[u8]) -> Result<Envelope, MalformedEnvelope>;
}

/// Reasons an inbound frame is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Bytes did not decode as an envelope.
    Decode,
    /// Frame was not binary.
    NonBinary,
    /// Reply token matched no pending request.
    UnmatchedReply,
    /// Event type had no listener.
    UnhandledEvent,
}

impl DropReason {
    /// Label value used when recording the drop.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::NonBinary => "non_binary",
            Self::UnmatchedReply => "unmatched_reply",
            Self::UnhandledEvent => "unhandled_event",
        }
    }
}

/// Instrumentation hooks for the correlation engine and client.
///
/// Every hook defaults to doing nothing.
pub trait CorrelationMetrics: Send + Sync {
    /// A request was written to the transport.
    fn request_sent(&self, _message_type: MessageType) {}

    /// A reply was handed to its waiting caller.
    fn reply_matched(&self) {}

    /// An event was delivered to `listeners` listeners.
    fn event_dispatched(&self, _message_type: MessageType, _listeners: usize) {}

    /// An inbound frame was discarded.
    fn frame_dropped(&self, _reason: DropReason) {}

    /// The transport refused a request write.
    fn send_failure(&self) {}

    /// The number of requests awaiting a reply changed.
    fn pending_requests(&self, _count: usize) {}

    /// A reply arrived `duration` after its request was written.
    fn request_duration(&self, _duration: Duration) {}
}

/// Metrics sink that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMetrics;

impl CorrelationMetrics for NoMetrics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::Decode.as_str(), "decode");
        assert_eq!(DropReason::NonBinary.as_str(), "non_binary");
        assert_eq!(DropReason::UnmatchedReply.as_str(), "unmatched_reply");
        assert_eq!(DropReason::UnhandledEvent.as_str(), "unhandled_event");
    }
}
