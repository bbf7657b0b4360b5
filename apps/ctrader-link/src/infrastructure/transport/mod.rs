//! Transport Adapters
//!
//! Implementations of the `Transport` port:
//!
//! - **WebSocket**: persistent connection with fixed-delay reconnection
//! - **TCP**: single connection with 4-byte length-prefixed framing
//!
//! Both share the heartbeat timer and connection-state tracking.

pub mod heartbeat;
pub mod reconnect;
pub mod state;
pub mod tcp;
pub mod websocket;

pub use heartbeat::{HeartbeatConfig, HeartbeatManager, HeartbeatSlot, HeartbeatTimer, ProbeSink};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::ConnectionState;
pub use tcp::{DEFAULT_MAX_FRAME_LENGTH, TcpTransport, TcpTransportConfig};
pub use websocket::{WebSocketTransport, WebSocketTransportConfig};
