//! Heartbeat Manager
//!
//! Emits keep-alive probes on a fixed cadence while a connection is live.
//! The timer is owned by a [`HeartbeatSlot`]: transports disarm it on
//! disconnect, re-arm it after a successful reconnect, and replace it
//! (stop-then-restart) when the cadence changes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{FrameKind, ProbeBuilder, TransportError};
use crate::infrastructure::metrics;

/// Destination for heartbeat probes, implemented by each transport's
/// write half.
#[async_trait]
pub trait ProbeSink: Send + Sync {
    /// Write one probe frame.
    async fn send_probe(&self, kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError>;
}

/// Configuration for heartbeat behavior.
#[derive(Clone)]
pub struct HeartbeatConfig {
    /// Interval between probes.
    pub interval: Duration,
    /// Probe frame builder, invoked on each tick.
    pub probe: ProbeBuilder,
}

impl HeartbeatConfig {
    /// Create a new configuration.
    #[must_use]
    pub fn new(interval: Duration, probe: ProbeBuilder) -> Self {
        Self { interval, probe }
    }
}

impl fmt::Debug for HeartbeatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatConfig")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Periodic probe emitter.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use async_trait::async_trait;
/// use ctrader_link::application::ports::{FrameKind, TransportError};
/// use ctrader_link::infrastructure::transport::heartbeat::{
///     HeartbeatConfig, HeartbeatManager, ProbeSink,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// struct Stdout;
///
/// #[async_trait]
/// impl ProbeSink for Stdout {
///     async fn send_probe(&self, _kind: FrameKind, data: Vec<u8>) -> Result<(), TransportError> {
///         println!("probe: {data:?}");
///         Ok(())
///     }
/// }
///
/// async fn example() {
///     let config = HeartbeatConfig::new(
///         Duration::from_secs(10),
///         Arc::new(|| (FrameKind::Binary, vec![0x08, 0x33])),
///     );
///     let cancel = CancellationToken::new();
///     let manager = HeartbeatManager::new(config, Arc::new(Stdout), cancel.clone());
///
///     tokio::spawn(manager.run());
///     cancel.cancel();
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    sink: Arc<dyn ProbeSink>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        sink: Arc<dyn ProbeSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            sink,
            cancel,
        }
    }

    /// Run the probe loop until cancelled.
    ///
    /// The first probe goes out one interval after start. A failed write is
    /// logged and the loop keeps ticking; the read loop owns failure handling.
    pub async fn run(self) {
        let period = self.config.interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let (kind, data) = (self.config.probe)();
                    match self.sink.send_probe(kind, data).await {
                        Ok(()) => metrics::record_heartbeat_sent(),
                        Err(e) => tracing::debug!(error = %e, "Heartbeat probe not sent"),
                    }
                }
            }
        }
    }
}

/// Handle to a running heartbeat task.
#[derive(Debug)]
pub struct HeartbeatTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl HeartbeatTimer {
    /// Spawn a heartbeat manager on the current runtime.
    #[must_use]
    pub fn start(config: HeartbeatConfig, sink: Arc<dyn ProbeSink>) -> Self {
        let cancel = CancellationToken::new();
        let manager = HeartbeatManager::new(config, sink, cancel.clone());
        let handle = tokio::spawn(manager.run());
        Self { cancel, handle }
    }

    /// Stop the heartbeat task.
    pub fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }

    /// Check whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Heartbeat configuration plus at most one live timer.
#[derive(Debug, Default)]
pub struct HeartbeatSlot {
    config: Option<HeartbeatConfig>,
    timer: Option<HeartbeatTimer>,
}

impl HeartbeatSlot {
    /// Create an empty slot with an optional initial configuration.
    #[must_use]
    pub const fn new(config: Option<HeartbeatConfig>) -> Self {
        Self {
            config,
            timer: None,
        }
    }

    /// Replace the configuration, stopping any running timer.
    ///
    /// A zero interval clears the configuration. Returns `true` if a timer
    /// was running before the call.
    pub fn configure(&mut self, interval: Duration, probe: ProbeBuilder) -> bool {
        let was_running = self.disarm();
        self.config = (!interval.is_zero()).then(|| HeartbeatConfig::new(interval, probe));
        was_running
    }

    /// Start a timer writing to `sink` if a configuration is present.
    ///
    /// Any running timer is stopped first. Does nothing outside a tokio runtime.
    pub fn arm(&mut self, sink: Arc<dyn ProbeSink>) {
        self.disarm();
        let Some(config) = self.config.clone() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("No tokio runtime, heartbeat not armed");
            return;
        }
        tracing::debug!(interval_ms = config.interval.as_millis(), "Heartbeat armed");
        self.timer = Some(HeartbeatTimer::start(config, sink));
    }

    /// Stop the running timer, if any. Returns `true` if one was running.
    pub fn disarm(&mut self) -> bool {
        self.timer.take().is_some_and(|timer| {
            timer.stop();
            true
        })
    }

    /// Check whether a timer is currently armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(HeartbeatTimer::is_running)
    }

    /// Check whether a heartbeat is configured.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.config.is_some()
    }
}
