//! Persistent WebSocket Transport
//!
//! Frame-oriented transport over a WebSocket: one `send` is one frame on the
//! wire, so message boundaries hold without extra framing.
//!
//! # Lifecycle
//!
//! ```text
//! listen() ──► Connecting ──dial ok──► Connected ──read error──► Disconnected
//!                  ▲                                                  │
//!                  └──────────── fixed backoff (auto-reconnect) ◄─────┘
//! ```
//!
//! The heartbeat timer is armed on entering `Connected` and disarmed before
//! leaving it. `close()` is the only terminal transition.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatSlot, ProbeSink};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::{ConnectionState, StateCell};
use crate::application::ports::{
    FrameKind, MessageHandler, ProbeBuilder, Transport, TransportError,
};
use crate::infrastructure::metrics::{self, TransportKind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketTransportConfig {
    /// WebSocket URL.
    pub url: String,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
    /// Redial after connection failures.
    pub auto_reconnect: bool,
    /// Initial heartbeat configuration.
    pub heartbeat: Option<HeartbeatConfig>,
}

impl WebSocketTransportConfig {
    /// Create a configuration with the default fixed reconnect delay.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            auto_reconnect: true,
            heartbeat: None,
        }
    }

    /// Create configuration from `TransportSettings`.
    #[must_use]
    pub fn from_transport_settings(
        url: impl Into<String>,
        settings: &crate::TransportSettings,
    ) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::from_transport_settings(settings),
            auto_reconnect: settings.auto_reconnect,
            heartbeat: None,
        }
    }

    /// Set the reconnection schedule.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Enable or disable auto-reconnect.
    #[must_use]
    pub const fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Set the initial heartbeat.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, probe: ProbeBuilder) -> Self {
        self.heartbeat = (!interval.is_zero()).then(|| HeartbeatConfig::new(interval, probe));
        self
    }
}

// =============================================================================
// Write Half
// =============================================================================

/// Write half shared with the heartbeat task.
struct Writer {
    sink: tokio::sync::Mutex<Option<WsSink>>,
    closed: AtomicBool,
}

impl Writer {
    async fn write(&self, kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let message = match kind {
            FrameKind::Binary => Message::Binary(data.into()),
            FrameKind::Text => Message::Text(String::from_utf8_lossy(&data).into_owned().into()),
        };

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(message).await?;
        Ok(())
    }

    async fn release(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink
            && let Err(e) = sink.close().await
        {
            tracing::debug!(error = %e, "WebSocket sink close failed");
        }
    }
}

#[async_trait]
impl ProbeSink for Writer {
    async fn send_probe(&self, kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError> {
        self.write(kind, data).await
    }
}

// =============================================================================
// Transport
// =============================================================================

/// WebSocket transport with automatic reconnection and heartbeat.
pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    writer: Arc<Writer>,
    handler: RwLock<Option<MessageHandler>>,
    heartbeat: Mutex<HeartbeatSlot>,
    state: StateCell,
    listening: AtomicBool,
    cancel: CancellationToken,
}

impl WebSocketTransport {
    /// Create a new transport. No connection is made until [`Transport::listen`].
    #[must_use]
    pub fn new(config: WebSocketTransportConfig) -> Self {
        let heartbeat = HeartbeatSlot::new(config.heartbeat.clone());
        Self {
            config,
            writer: Arc::new(Writer {
                sink: tokio::sync::Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
            handler: RwLock::new(None),
            heartbeat: Mutex::new(heartbeat),
            state: StateCell::new(TransportKind::WebSocket),
            listening: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Check whether a heartbeat timer is currently running.
    #[must_use]
    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.lock().is_armed()
    }

    /// Get the configured URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    async fn run(&self) -> Result<(), TransportError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            self.state.set(ConnectionState::Connecting);
            tracing::info!(url = %self.config.url, "Connecting to WebSocket endpoint");

            let dialed = tokio::select! {
                () = self.cancel.cancelled() => {
                    self.state.set(ConnectionState::Disconnected);
                    return Ok(());
                }
                result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result,
            };

            let error = match dialed {
                Ok((stream, _response)) => {
                    policy.reset();
                    match self.run_connection(stream).await {
                        Ok(()) => return Ok(()),
                        Err(e) => e,
                    }
                }
                Err(e) => {
                    self.state.set(ConnectionState::Disconnected);
                    TransportError::Connect(e.to_string())
                }
            };

            if self.cancel.is_cancelled() {
                return Ok(());
            }

            if !self.config.auto_reconnect {
                tracing::warn!(error = %error, "WebSocket connection failed, reconnect disabled");
                return Err(error);
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(error = %error, "WebSocket reconnection attempts exhausted");
                return Err(TransportError::ReconnectExhausted(policy.max_attempts()));
            };

            tracing::warn!(
                error = %error,
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "WebSocket connection lost, reconnecting"
            );
            metrics::record_reconnect(TransportKind::WebSocket);

            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Drive one live connection until it fails or the transport is closed.
    async fn run_connection(&self, stream: WsStream) -> Result<(), TransportError> {
        let (sink, mut source) = stream.split();
        *self.writer.sink.lock().await = Some(sink);

        let closed_meanwhile = {
            let mut slot = self.heartbeat.lock();
            if self.cancel.is_cancelled() {
                true
            } else {
                slot.arm(Arc::clone(&self.writer) as Arc<dyn ProbeSink>);
                self.state.set(ConnectionState::Connected);
                false
            }
        };
        if closed_meanwhile {
            self.teardown().await;
            return Ok(());
        }
        tracing::info!(url = %self.config.url, "WebSocket connected");

        let result = self.read_loop(&mut source).await;
        self.teardown().await;
        result
    }

    async fn read_loop(&self, source: &mut WsSource) -> Result<(), TransportError> {
        loop {
            let message = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                message = source.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => self.deliver(FrameKind::Binary, &data),
                Some(Ok(Message::Text(text))) => self.deliver(FrameKind::Text, text.as_bytes()),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    return Err(TransportError::ConnectionClosed);
                }
                // Ping replies are queued by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    async fn teardown(&self) {
        {
            let mut slot = self.heartbeat.lock();
            slot.disarm();
            self.state.set(ConnectionState::Disconnected);
        }
        self.writer.release().await;
    }

    fn deliver(&self, kind: FrameKind, data: &[u8]) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(kind, data);
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError> {
        self.writer.write(kind, data).await
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.write() = Some(handler);
    }

    async fn listen(&self) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyListening);
        }

        let result = self.run().await;
        self.listening.store(false, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.writer.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(url = %self.config.url, "Closing WebSocket transport");
        self.cancel.cancel();
        self.teardown().await;
        Ok(())
    }

    fn set_heartbeat(&self, interval: Duration, probe: ProbeBuilder) {
        let mut slot = self.heartbeat.lock();
        slot.configure(interval, probe);
        if self.state.get().is_connected() {
            slot.arm(Arc::clone(&self.writer) as Arc<dyn ProbeSink>);
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.heartbeat.get_mut().disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> ProbeBuilder {
        Arc::new(|| (FrameKind::Binary, vec![0x08, 0x33]))
    }

    #[test]
    fn config_from_settings() {
        let settings = crate::TransportSettings {
            reconnect_delay: Duration::from_millis(750),
            max_reconnect_attempts: 4,
            auto_reconnect: false,
            ..crate::TransportSettings::default()
        };
        let config = WebSocketTransportConfig::from_transport_settings("ws://localhost:1", &settings);
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(750));
        assert_eq!(config.reconnect.max_attempts, 4);
        assert!(!config.auto_reconnect);
        assert!(config.heartbeat.is_none());
    }

    #[test]
    fn zero_heartbeat_interval_is_disabled() {
        let config = WebSocketTransportConfig::new("ws://localhost:1")
            .with_heartbeat(Duration::ZERO, probe());
        assert!(config.heartbeat.is_none());
    }

    #[tokio::test]
    async fn send_before_connect_is_rejected() {
        let transport = WebSocketTransport::new(WebSocketTransportConfig::new("ws://localhost:1"));
        let result = transport.send(FrameKind::Binary, vec![1]).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn heartbeat_is_not_armed_while_disconnected() {
        let transport = WebSocketTransport::new(WebSocketTransportConfig::new("ws://localhost:1"));
        transport.set_heartbeat(Duration::from_millis(10), probe());
        assert!(!transport.heartbeat_active());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = WebSocketTransport::new(WebSocketTransportConfig::new("ws://localhost:1"));
        assert!(transport.close().await.is_ok());
        assert!(transport.close().await.is_ok());
        assert!(matches!(transport.listen().await, Err(TransportError::Closed)));
        assert!(matches!(
            transport.send(FrameKind::Binary, vec![1]).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn connect_failure_without_reconnect_is_fatal() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(
            WebSocketTransportConfig::new(format!("ws://{addr}")).with_auto_reconnect(false),
        );
        let result = transport.listen().await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_attempts_exhaust() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WebSocketTransport::new(
            WebSocketTransportConfig::new(format!("ws://{addr}")).with_reconnect(
                ReconnectConfig::fixed(Duration::from_millis(10)).with_max_attempts(2),
            ),
        );
        let result = tokio::time::timeout(Duration::from_secs(5), transport.listen())
            .await
            .expect("listen should give up");
        assert!(matches!(result, Err(TransportError::ReconnectExhausted(2))));
    }
}
