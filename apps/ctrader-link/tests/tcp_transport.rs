//! TCP Transport Integration Tests
//!
//! Runs the client over the length-prefixed TCP transport against an
//! in-process peer that batches and splits frames on purpose.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use ctrader_link::{
    ClientError, Credentials, Envelope, EnvelopeCodec, HEARTBEAT_EVENT, TransportError,
    TransportSettings, tcp_client,
};

const WAIT: Duration = Duration::from_secs(5);

fn credentials() -> Credentials {
    Credentials::new("id".to_string(), "secret".to_string(), "token".to_string())
}

fn settings() -> TransportSettings {
    TransportSettings {
        heartbeat_interval: Duration::ZERO,
        ..TransportSettings::default()
    }
}

fn frame(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(u32::try_from(data.len()).unwrap());
    buf.put_slice(data);
}

#[tokio::test]
async fn replies_written_in_one_burst_are_split_and_routed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut requests = FramedRead::new(read_half, LengthDelimitedCodec::new());
        let codec = EnvelopeCodec::new();

        let first = codec.decode(&requests.next().await.unwrap().unwrap()).unwrap();
        let second = codec.decode(&requests.next().await.unwrap().unwrap()).unwrap();

        // Both replies plus an event, newest first, in a single write, with
        // the last frame's tail held back for a second write.
        let mut burst = BytesMut::new();
        frame(
            &mut burst,
            &codec.encode(second.message_type(), b"second", second.correlation_token()),
        );
        frame(
            &mut burst,
            &codec.encode_envelope(&Envelope::event(2126, b"event".to_vec())),
        );
        frame(
            &mut burst,
            &codec.encode(first.message_type(), b"first", first.correlation_token()),
        );
        let tail = burst.split_off(burst.len() - 3);

        write_half.write_all(&burst).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        write_half.write_all(&tail).await.unwrap();

        // Keep the connection open until the client hangs up.
        while requests.next().await.is_some() {}
    });

    let client = tcp_client(addr.to_string(), credentials(), &settings())
        .await
        .unwrap();

    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    client.subscribe(2126, move |envelope| {
        let _ = event_tx.send(envelope.payload().to_vec());
    });

    let (first, second) = tokio::join!(
        client.request_with_timeout(WAIT, 100, Vec::new()),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            client.request_with_timeout(WAIT, 200, Vec::new()).await
        }
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!((first.message_type(), first.payload()), (100, &b"first"[..]));
    assert_eq!((second.message_type(), second.payload()), (200, &b"second"[..]));
    assert_eq!(
        timeout(WAIT, event_rx.recv()).await.unwrap().unwrap(),
        b"event"
    );

    client.close().await.unwrap();
    timeout(WAIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn heartbeat_probes_are_framed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let settings = TransportSettings {
        heartbeat_interval: Duration::from_millis(25),
        ..TransportSettings::default()
    };
    let client = tcp_client(addr.to_string(), credentials(), &settings)
        .await
        .unwrap();

    let (stream, _) = listener.accept().await.unwrap();
    let mut frames = FramedRead::new(stream, LengthDelimitedCodec::new());
    let probe = timeout(WAIT, frames.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let envelope = EnvelopeCodec::new().decode(&probe).unwrap();
    assert_eq!(envelope.message_type(), HEARTBEAT_EVENT);
    assert!(envelope.is_event());

    client.close().await.unwrap();
}

#[tokio::test]
async fn request_after_peer_hangup_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tcp_client(addr.to_string(), credentials(), &settings())
        .await
        .unwrap();
    let (peer, _) = listener.accept().await.unwrap();
    drop(peer);

    // A write may still land in the socket buffer until the receive loop
    // sees the hangup; after that every send is refused up front.
    let result = timeout(WAIT, async {
        loop {
            match client
                .request_with_timeout(Duration::from_millis(50), 100, Vec::new())
                .await
            {
                Err(ClientError::Send(TransportError::NotConnected)) => break,
                _ => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await;
    assert!(result.is_ok(), "sends kept succeeding after the peer hung up");
    assert_eq!(client.pending_requests(), 0);

    let started = Instant::now();
    let result = client
        .request(&CancellationToken::new(), 100, Vec::new())
        .await;
    assert!(matches!(
        result,
        Err(ClientError::Send(TransportError::NotConnected))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));

    client.close().await.unwrap();
}

#[tokio::test]
async fn unreachable_address_fails_at_construction() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = tcp_client(addr.to_string(), credentials(), &settings()).await;
    assert!(matches!(result, Err(TransportError::Connect(_))));
}
