//! cTrader Link Binary
//!
//! Connects to the cTrader Open API, logs pushed heartbeats, and checks the
//! server version through a correlated request.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ctrader-link
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `CTRADER_CLIENT_ID`: Application client id
//! - `CTRADER_CLIENT_SECRET`: Application client secret
//! - `CTRADER_ACCESS_TOKEN`: Account access token
//!
//! ## Optional
//! - `CTRADER_ENV`: DEMO | LIVE (default: DEMO)
//! - `CTRADER_TRANSPORT`: websocket | tcp (default: websocket)
//! - `CTRADER_ENDPOINT`: Override the endpoint URL or address
//! - `CTRADER_HEARTBEAT_INTERVAL_SECS`: Heartbeat interval, 0 disables (default: 10)
//! - `CTRADER_RECONNECT_DELAY_MS`: Fixed reconnect delay (default: 2000)
//! - `CTRADER_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `CTRADER_AUTO_RECONNECT`: Redial after failures (default: true)
//! - `CTRADER_REQUEST_TIMEOUT_SECS`: Default request deadline (default: 30)
//! - `CTRADER_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ctrader-link)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use ctrader_link::infrastructure::{metrics, telemetry};
use ctrader_link::{
    Client, ClientConfig, ClientError, ERROR_RES, Envelope, HEARTBEAT_EVENT, TransportError,
    VERSION_REQ, connect,
};
use prost::Message;
use tokio::signal;

/// Attempts at the startup version check while the connection comes up.
const CONNECT_RETRIES: u32 = 20;

/// Pause between version check attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Server version reply (`ProtoVersionRes`); only the version field is read.
#[derive(Clone, PartialEq, Message)]
struct VersionRes {
    #[prost(string, required, tag = "2")]
    version: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting cTrader Link");

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.metrics_port == 0 {
        let _ = metrics::init_metrics();
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        metrics::serve_metrics(addr).context("failed to start metrics exporter")?;
        tracing::info!(%addr, "Prometheus metrics exporter listening");
    }

    let client = connect(&config)
        .await
        .with_context(|| format!("failed to connect to {}", config.endpoint.as_str()))?;

    client.subscribe(HEARTBEAT_EVENT, |_| {
        tracing::debug!("Server heartbeat received");
    });

    check_version(&client).await;

    await_shutdown().await;

    tracing::info!("Shutting down");
    client.close().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Ask the server for its version and log the outcome.
///
/// The WebSocket dial runs in the background, so early attempts may find no
/// connection yet.
async fn check_version(client: &Client) {
    for _ in 0..CONNECT_RETRIES {
        match client.request_default(VERSION_REQ, Vec::new()).await {
            Ok(reply) => {
                log_version_reply(&reply);
                return;
            }
            Err(ClientError::Send(TransportError::NotConnected)) => {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(ClientError::Timeout(after)) => {
                tracing::warn!(?after, "Version request timed out");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Version request failed");
                return;
            }
        }
    }
    tracing::warn!("No connection for version request");
}

fn log_version_reply(reply: &Envelope) {
    if reply.message_type() == ERROR_RES {
        tracing::warn!(len = reply.payload().len(), "Server rejected version request");
        return;
    }

    match VersionRes::decode(reply.payload()) {
        Ok(res) => tracing::info!(version = %res.version, "Connected to Open API"),
        Err(e) => tracing::warn!(error = %e, "Undecodable version reply"),
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        endpoint = config.endpoint.as_str(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval = ?config.transport.heartbeat_interval,
        reconnect_delay = ?config.transport.reconnect_delay,
        max_reconnect_attempts = config.transport.max_reconnect_attempts,
        auto_reconnect = config.transport.auto_reconnect,
        request_timeout = ?config.request_timeout,
        "Transport settings"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
