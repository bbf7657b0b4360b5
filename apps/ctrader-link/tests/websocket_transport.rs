//! WebSocket Transport Integration Tests
//!
//! Runs the persistent transport against an in-process WebSocket server to
//! check reconnection, heartbeat re-arming, and end-to-end correlation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use ctrader_link::{
    ConnectionState, Credentials, Envelope, EnvelopeCodec, FrameKind, HEARTBEAT_EVENT,
    ReconnectConfig, Transport, TransportSettings, WebSocketTransport, WebSocketTransportConfig,
    websocket_client,
};

const WAIT: Duration = Duration::from_secs(5);

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    timeout(WAIT, rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
}

fn heartbeat_probe() -> ctrader_link::ProbeBuilder {
    Arc::new(|| {
        (
            FrameKind::Binary,
            EnvelopeCodec::new().encode_envelope(&Envelope::heartbeat()),
        )
    })
}

fn credentials() -> Credentials {
    Credentials::new("id".to_string(), "secret".to_string(), "token".to_string())
}

#[tokio::test]
async fn reconnects_after_read_failure_and_rearms_heartbeat() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (probe_tx, mut probe_rx) = mpsc::unbounded_channel::<(usize, u32)>();
    let (drop_tx, drop_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        // First connection: read one probe, then vanish without a close frame.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Binary(data))) = ws.next().await {
            let envelope = EnvelopeCodec::new().decode(&data).unwrap();
            probe_tx.send((1, envelope.message_type())).unwrap();
        }
        drop_rx.await.unwrap();
        drop(ws);

        // Second connection: hold the handshake so `Connecting` is observable.
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Binary(data) = message {
                let envelope = EnvelopeCodec::new().decode(&data).unwrap();
                if probe_tx.send((2, envelope.message_type())).is_err() {
                    break;
                }
            }
        }
    });

    let backoff = Duration::from_millis(150);
    let transport = Arc::new(WebSocketTransport::new(
        WebSocketTransportConfig::new(url.clone())
            .with_reconnect(ReconnectConfig::fixed(backoff))
            .with_heartbeat(Duration::from_millis(30), heartbeat_probe()),
    ));
    let mut states = transport.state_changes();

    let listen = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move { transport.listen().await }
    });

    wait_for_state(&mut states, ConnectionState::Connected).await;
    assert!(transport.heartbeat_active());
    assert_eq!(
        timeout(WAIT, probe_rx.recv()).await.unwrap(),
        Some((1, HEARTBEAT_EVENT))
    );

    drop_tx.send(()).unwrap();

    wait_for_state(&mut states, ConnectionState::Disconnected).await;
    let lost_at = Instant::now();
    assert!(!transport.heartbeat_active());

    wait_for_state(&mut states, ConnectionState::Connecting).await;
    assert!(lost_at.elapsed() >= backoff - Duration::from_millis(20));
    assert!(!transport.heartbeat_active());

    wait_for_state(&mut states, ConnectionState::Connected).await;
    assert!(transport.heartbeat_active());
    assert_eq!(
        timeout(WAIT, probe_rx.recv()).await.unwrap(),
        Some((2, HEARTBEAT_EVENT))
    );

    transport.close().await.unwrap();
    assert!(timeout(WAIT, listen).await.unwrap().unwrap().is_ok());
    assert!(!transport.heartbeat_active());
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    server.abort();
}

#[tokio::test]
async fn heartbeat_cadence_changes_on_live_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (probe_tx, mut probe_rx) = mpsc::unbounded_channel::<Instant>();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_binary() && probe_tx.send(Instant::now()).is_err() {
                break;
            }
        }
    });

    let transport = Arc::new(WebSocketTransport::new(WebSocketTransportConfig::new(url)));
    let mut states = transport.state_changes();
    let listen = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move { transport.listen().await }
    });

    wait_for_state(&mut states, ConnectionState::Connected).await;
    assert!(!transport.heartbeat_active());

    transport.set_heartbeat(Duration::from_millis(25), heartbeat_probe());
    assert!(transport.heartbeat_active());
    timeout(WAIT, probe_rx.recv()).await.unwrap().unwrap();

    transport.set_heartbeat(Duration::ZERO, heartbeat_probe());
    assert!(!transport.heartbeat_active());

    transport.close().await.unwrap();
    assert!(timeout(WAIT, listen).await.unwrap().unwrap().is_ok());
    server.abort();
}

#[tokio::test]
async fn close_twice_does_not_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel::<()>();
    let server = tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepted_tx.send(()).unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
        }
    });

    let transport = Arc::new(WebSocketTransport::new(
        WebSocketTransportConfig::new(url)
            .with_reconnect(ReconnectConfig::fixed(Duration::from_millis(20))),
    ));
    let mut states = transport.state_changes();
    let listen = tokio::spawn({
        let transport = Arc::clone(&transport);
        async move { transport.listen().await }
    });

    wait_for_state(&mut states, ConnectionState::Connected).await;
    accepted_rx.recv().await.unwrap();

    assert!(transport.close().await.is_ok());
    assert!(transport.close().await.is_ok());
    assert!(timeout(WAIT, listen).await.unwrap().unwrap().is_ok());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(accepted_rx.try_recv().is_err());
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(transport.listen().await.is_err());

    server.abort();
}

#[tokio::test]
async fn client_round_trip_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    // Echo server: replies to each request with its payload reversed and
    // pushes one unsolicited event first.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let codec = EnvelopeCodec::new();
        while let Some(Ok(message)) = ws.next().await {
            let Message::Binary(data) = message else {
                continue;
            };
            let request = codec.decode(&data).unwrap();
            if request.is_event() {
                continue;
            }
            let event = codec.encode_envelope(&Envelope::event(2126, b"tick".to_vec()));
            ws.send(Message::Binary(event.into())).await.unwrap();

            let mut payload = request.payload().to_vec();
            payload.reverse();
            let reply = codec.encode(
                request.message_type(),
                &payload,
                request.correlation_token(),
            );
            ws.send(Message::Binary(reply.into())).await.unwrap();
        }
    });

    let settings = TransportSettings {
        heartbeat_interval: Duration::ZERO,
        ..TransportSettings::default()
    };
    let client = websocket_client(url, credentials(), &settings);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    client.subscribe(2126, move |envelope| {
        let _ = event_tx.send(envelope.payload().to_vec());
    });

    // The dial happens in the background; retry until connected.
    let reply = timeout(WAIT, async {
        loop {
            match client
                .request_with_timeout(Duration::from_millis(500), 2104, b"abc".to_vec())
                .await
            {
                Ok(reply) => break reply,
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(reply.payload(), b"cba");
    assert_eq!(event_rx.recv().await.unwrap(), b"tick");
    assert_eq!(client.credentials().client_id(), "id");

    client.close().await.unwrap();
    server.abort();
}
