//! Length-Prefixed TCP Transport
//!
//! Raw byte-stream transport for the Open API TCP endpoint. A byte stream
//! does not keep message boundaries, so every frame carries a 4-byte
//! big-endian length prefix:
//!
//! ```text
//! ┌────────────────┬──────────────────────────────┐
//! │ length (u32 BE)│ ProtoMessage bytes (length)  │
//! └────────────────┴──────────────────────────────┘
//! ```
//!
//! The connection is made once at construction; there is no reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatSlot, ProbeSink};
use super::state::{ConnectionState, StateCell};
use crate::application::ports::{
    FrameKind, MessageHandler, ProbeBuilder, Transport, TransportError,
};
use crate::infrastructure::metrics::TransportKind;

type FrameReader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type FrameWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// Default maximum frame length (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Socket address (`host:port`).
    pub addr: String,
    /// Largest accepted frame; longer frames fail the read loop.
    pub max_frame_length: usize,
    /// Initial heartbeat configuration.
    pub heartbeat: Option<HeartbeatConfig>,
}

impl TcpTransportConfig {
    /// Create a configuration with the default frame limit.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            heartbeat: None,
        }
    }

    /// Create configuration from `TransportSettings`.
    #[must_use]
    pub fn from_transport_settings(
        addr: impl Into<String>,
        settings: &crate::TransportSettings,
    ) -> Self {
        Self {
            addr: addr.into(),
            max_frame_length: settings.max_frame_length,
            heartbeat: None,
        }
    }

    /// Set the maximum frame length.
    #[must_use]
    pub const fn with_max_frame_length(mut self, max_frame_length: usize) -> Self {
        self.max_frame_length = max_frame_length;
        self
    }

    fn codec(&self) -> tokio_util::codec::length_delimited::Builder {
        let mut builder = LengthDelimitedCodec::builder();
        builder
            .length_field_length(4)
            .big_endian()
            .max_frame_length(self.max_frame_length);
        builder
    }
}

struct Writer {
    frames: tokio::sync::Mutex<Option<FrameWriter>>,
    closed: AtomicBool,
}

impl Writer {
    async fn write(&self, data: Vec<u8>) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut guard = self.frames.lock().await;
        let frames = guard.as_mut().ok_or(TransportError::NotConnected)?;
        frames.send(Bytes::from(data)).await?;
        Ok(())
    }

    /// Drop the write half; later writes see `NotConnected`.
    async fn release(&self) {
        let frames = self.frames.lock().await.take();
        if let Some(mut frames) = frames
            && let Err(e) = SinkExt::<Bytes>::close(&mut frames).await
        {
            tracing::debug!(error = %e, "TCP write half shutdown failed");
        }
    }
}

#[async_trait]
impl ProbeSink for Writer {
    async fn send_probe(&self, _kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError> {
        self.write(data).await
    }
}

/// TCP transport with explicit length-prefixed framing.
pub struct TcpTransport {
    addr: String,
    writer: Arc<Writer>,
    reader: Mutex<Option<FrameReader>>,
    handler: RwLock<Option<MessageHandler>>,
    heartbeat: Mutex<HeartbeatSlot>,
    state: StateCell,
    listening: AtomicBool,
    cancel: CancellationToken,
}

impl TcpTransport {
    /// Connect to the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP connection cannot be established.
    pub async fn connect(config: TcpTransportConfig) -> Result<Self, TransportError> {
        tracing::info!(addr = %config.addr, "Connecting to TCP endpoint");
        let stream = TcpStream::connect(config.addr.as_str())
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {e}", config.addr)))?;
        stream.set_nodelay(true)?;

        let codec = config.codec();
        let (read_half, write_half) = stream.into_split();
        let state = StateCell::new(TransportKind::Tcp);
        state.set(ConnectionState::Connected);

        Ok(Self {
            writer: Arc::new(Writer {
                frames: tokio::sync::Mutex::new(Some(codec.new_write(write_half))),
                closed: AtomicBool::new(false),
            }),
            reader: Mutex::new(Some(codec.new_read(read_half))),
            handler: RwLock::new(None),
            heartbeat: Mutex::new(HeartbeatSlot::new(config.heartbeat)),
            state,
            listening: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            addr: config.addr,
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Check whether a heartbeat timer is currently running.
    #[must_use]
    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.lock().is_armed()
    }

    /// Get the remote address.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn read_loop(&self, reader: &mut FrameReader) -> Result<(), TransportError> {
        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                frame = reader.next() => frame,
            };

            match frame {
                Some(Ok(bytes)) => {
                    let handler = self.handler.read().clone();
                    if let Some(handler) = handler {
                        handler(FrameKind::Binary, &bytes);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None if self.cancel.is_cancelled() => return Ok(()),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    /// Disarm the heartbeat and leave `Connected`, then drop the write half.
    async fn teardown(&self) {
        {
            let mut slot = self.heartbeat.lock();
            slot.disarm();
            self.listening.store(false, Ordering::SeqCst);
            self.state.set(ConnectionState::Disconnected);
        }
        self.writer.release().await;
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, _kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError> {
        self.writer.write(data).await
    }

    fn on_message(&self, handler: MessageHandler) {
        *self.handler.write() = Some(handler);
    }

    async fn listen(&self) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let Some(mut reader) = self.reader.lock().take() else {
            return Err(TransportError::AlreadyListening);
        };

        {
            let mut slot = self.heartbeat.lock();
            if self.state.get().is_connected() {
                self.listening.store(true, Ordering::SeqCst);
                slot.arm(Arc::clone(&self.writer) as Arc<dyn ProbeSink>);
            }
        }

        let result = self.read_loop(&mut reader).await;
        self.teardown().await;

        if let Err(e) = &result {
            tracing::warn!(addr = %self.addr, error = %e, "TCP receive loop terminated");
        }
        result
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.writer.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(addr = %self.addr, "Closing TCP transport");
        self.cancel.cancel();
        self.teardown().await;
        Ok(())
    }

    fn set_heartbeat(&self, interval: Duration, probe: ProbeBuilder) {
        let mut slot = self.heartbeat.lock();
        slot.configure(interval, probe);

        if self.listening.load(Ordering::SeqCst) && self.state.get().is_connected() {
            slot.arm(Arc::clone(&self.writer) as Arc<dyn ProbeSink>);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.heartbeat.get_mut().disarm();
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn frames_carry_big_endian_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::connect(TcpTransportConfig::new(addr.to_string()))
            .await
            .unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        transport
            .send(FrameKind::Binary, vec![0xaa, 0xbb, 0xcc])
            .await
            .unwrap();

        let mut buf = [0u8; 7];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 3, 0xaa, 0xbb, 0xcc]);
    }

    #[tokio::test]
    async fn coalesced_frames_are_split() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = Arc::new(
            TcpTransport::connect(TcpTransportConfig::new(addr.to_string()))
                .await
                .unwrap(),
        );
        let (mut peer, _) = listener.accept().await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        transport.on_message(Arc::new(move |kind: FrameKind, data: &[u8]| {
            assert_eq!(kind, FrameKind::Binary);
            sink.lock().push(data.to_vec());
        }));

        let listen = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.listen().await }
        });

        // Two frames in one write, the second split across two writes.
        peer.write_all(&[0, 0, 0, 2, 1, 2, 0, 0, 0, 3, 3]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.write_all(&[4, 5]).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while received.lock().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both frames delivered");

        assert_eq!(*received.lock(), vec![vec![1, 2], vec![3, 4, 5]]);

        transport.close().await.unwrap();
        let result = listen.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn peer_disconnect_ends_listen_with_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::connect(TcpTransportConfig::new(addr.to_string()))
            .await
            .unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);

        let result = tokio::time::timeout(Duration::from_secs(2), transport.listen())
            .await
            .unwrap();
        assert!(result.is_err());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn dead_connection_rejects_writes_and_heartbeat() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::connect(TcpTransportConfig::new(addr.to_string()))
            .await
            .unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);

        let result = tokio::time::timeout(Duration::from_secs(2), transport.listen())
            .await
            .unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));

        assert!(matches!(
            transport.send(FrameKind::Binary, vec![1, 2, 3]).await,
            Err(TransportError::NotConnected)
        ));

        transport.set_heartbeat(
            Duration::from_millis(10),
            Arc::new(|| (FrameKind::Binary, vec![0x08, 0x33])),
        );
        assert!(!transport.heartbeat_active());
        assert!(transport.close().await.is_ok());
    }

    #[tokio::test]
    async fn oversized_frame_is_a_read_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::connect(
            TcpTransportConfig::new(addr.to_string()).with_max_frame_length(8),
        )
        .await
        .unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(&[0, 0, 0, 64]).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), transport.listen())
            .await
            .unwrap();
        assert!(matches!(result, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn second_listen_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = Arc::new(
            TcpTransport::connect(TcpTransportConfig::new(addr.to_string()))
                .await
                .unwrap(),
        );
        let _peer = listener.accept().await.unwrap();

        let first = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.listen().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            transport.listen().await,
            Err(TransportError::AlreadyListening)
        ));

        transport.close().await.unwrap();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn heartbeat_runs_while_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = Arc::new(
            TcpTransport::connect(TcpTransportConfig::new(addr.to_string()))
                .await
                .unwrap(),
        );
        let (mut peer, _) = listener.accept().await.unwrap();

        transport.set_heartbeat(
            Duration::from_millis(20),
            Arc::new(|| (FrameKind::Binary, vec![0x08, 0x33])),
        );
        assert!(!transport.heartbeat_active());

        let listen = tokio::spawn({
            let transport = Arc::clone(&transport);
            async move { transport.listen().await }
        });

        let mut buf = [0u8; 6];
        tokio::time::timeout(Duration::from_secs(2), peer.read_exact(&mut buf))
            .await
            .expect("probe should arrive")
            .unwrap();
        assert_eq!(buf, [0, 0, 0, 2, 0x08, 0x33]);
        assert!(transport.heartbeat_active());

        transport.close().await.unwrap();
        assert!(!transport.heartbeat_active());
        assert!(listen.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = TcpTransport::connect(TcpTransportConfig::new(addr.to_string()))
            .await
            .unwrap();
        assert!(transport.close().await.is_ok());
        assert!(transport.close().await.is_ok());
        assert!(matches!(
            transport.send(FrameKind::Binary, vec![1]).await,
            Err(TransportError::Closed)
        ));
    }
}
