//! Connection State
//!
//! Lifecycle of the persistent socket, published through a watch channel so
//! callers can observe reconnect cycles.

use std::fmt;

use tokio::sync::watch;

use crate::infrastructure::metrics::{self, TransportKind};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live socket.
    #[default]
    Disconnected,
    /// Dialing the endpoint.
    Connecting,
    /// Socket is live and the read loop is running.
    Connected,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }

    /// Check if the state is `Connected`.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publisher for state transitions.
#[derive(Debug)]
pub struct StateCell {
    kind: TransportKind,
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    /// Create a cell starting in `Disconnected`.
    #[must_use]
    pub fn new(kind: TransportKind) -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { kind, tx }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Publish a new state; repeated values are not re-announced.
    pub fn set(&self, state: ConnectionState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            tracing::debug!(transport = ?self.kind, state = %state, "Connection state changed");
            metrics::set_connected(self.kind, state.is_connected());
        }
    }

    /// Subscribe to future transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
