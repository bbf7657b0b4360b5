//! Prometheus Metrics Module
//!
//! Exposes client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Requests**: Requests sent, replies matched, round-trip latency
//! - **Dispatch**: Events delivered, frames dropped by reason
//! - **Connections**: Connection state, reconnects, heartbeat probes
//!
//! # Integration
//!
//! The binary exposes `/metrics` on `CTRADER_METRICS_PORT` when it is set.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::{CorrelationMetrics, DropReason};
use crate::domain::envelope::MessageType;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder without an HTTP endpoint.
///
/// # Panics
///
/// Panics if another recorder has already been installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or a recorder is
/// already installed.
pub fn serve_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized with [`init_metrics`].
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ctrader_link_requests_sent_total",
        "Total correlated requests written to the transport"
    );
    describe_counter!(
        "ctrader_link_replies_matched_total",
        "Total replies delivered to a waiting caller"
    );
    describe_counter!(
        "ctrader_link_events_dispatched_total",
        "Total unsolicited envelopes delivered to listeners"
    );
    describe_counter!(
        "ctrader_link_frames_dropped_total",
        "Total inbound frames discarded, by reason"
    );
    describe_counter!(
        "ctrader_link_send_failures_total",
        "Total request writes rejected by the transport"
    );
    describe_counter!(
        "ctrader_link_reconnects_total",
        "Total reconnection attempts"
    );
    describe_counter!(
        "ctrader_link_heartbeats_sent_total",
        "Total heartbeat probes written"
    );

    describe_gauge!(
        "ctrader_link_pending_requests",
        "Requests awaiting a reply"
    );
    describe_gauge!(
        "ctrader_link_connected",
        "1 while the transport holds a live connection"
    );

    describe_histogram!(
        "ctrader_link_request_duration_seconds",
        "Time from request write to matched reply"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent WebSocket transport.
    WebSocket,
    /// Length-prefixed TCP transport.
    Tcp,
}

impl TransportKind {
    /// Label value for this transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Tcp => "tcp",
        }
    }
}

/// Record a request written to the transport.
pub fn record_request_sent(message_type: u32) {
    counter!(
        "ctrader_link_requests_sent_total",
        "message_type" => message_type.to_string()
    )
    .increment(1);
}

/// Record a reply delivered to its caller.
pub fn record_reply_matched() {
    counter!("ctrader_link_replies_matched_total").increment(1);
}

/// Record an event delivered to `listeners` listeners.
pub fn record_event_dispatched(message_type: u32, listeners: usize) {
    counter!(
        "ctrader_link_events_dispatched_total",
        "message_type" => message_type.to_string()
    )
    .increment(listeners as u64);
}

/// Record a discarded inbound frame.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "ctrader_link_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a request the transport refused to write.
pub fn record_send_failure() {
    counter!("ctrader_link_send_failures_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(transport: TransportKind) {
    counter!(
        "ctrader_link_reconnects_total",
        "transport" => transport.as_str()
    )
    .increment(1);
}

/// Record a heartbeat probe written.
pub fn record_heartbeat_sent() {
    counter!("ctrader_link_heartbeats_sent_total").increment(1);
}

/// Update the pending request gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_requests(count: usize) {
    gauge!("ctrader_link_pending_requests").set(count as f64);
}

/// Update the connection gauge.
pub fn set_connected(transport: TransportKind, connected: bool) {
    gauge!(
        "ctrader_link_connected",
        "transport" => transport.as_str()
    )
    .set(if connected { 1.0 } else { 0.0 });
}

/// Record request round-trip duration.
pub fn record_request_duration(duration: Duration) {
    histogram!("ctrader_link_request_duration_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Correlation Metrics Adapter
// =============================================================================

/// Records correlation engine activity in the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl CorrelationMetrics for PrometheusMetrics {
    fn request_sent(&self, message_type: MessageType) {
        record_request_sent(message_type);
    }

    fn reply_matched(&self) {
        record_reply_matched();
    }

    fn event_dispatched(&self, message_type: MessageType, listeners: usize) {
        record_event_dispatched(message_type, listeners);
    }

    fn frame_dropped(&self, reason: DropReason) {
        record_frame_dropped(reason);
    }

    fn send_failure(&self) {
        record_send_failure();
    }

    fn pending_requests(&self, count: usize) {
        set_pending_requests(count);
    }

    fn request_duration(&self, duration: Duration) {
        record_request_duration(duration);
    }
}

// =============================================================================
// Tests
// =============================================================================
