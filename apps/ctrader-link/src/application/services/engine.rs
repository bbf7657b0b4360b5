//! Correlation Engine
//!
//! Owns the pending-request registry and the event subscription table, both
//! behind one lock. The lock is only held for map operations; replies are
//! handed off through single-slot channels and listeners run after the lock
//! is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::application::ports::{
    CorrelationMetrics, DropReason, EnvelopeFormat, FrameKind, NoMetrics,
};
use crate::domain::correlation::{CorrelationToken, TokenSequence};
use crate::domain::envelope::{Envelope, MessageType};

/// Callback invoked for unsolicited envelopes of a subscribed type.
///
/// Listeners run synchronously on the transport's receive loop and must not
/// block.
pub type EventListener = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Default)]
struct Registry {
    sequence: TokenSequence,
    pending: HashMap<CorrelationToken, oneshot::Sender<Envelope>>,
    listeners: HashMap<MessageType, Vec<EventListener>>,
}

/// Routes inbound envelopes to waiting requests and event listeners.
pub struct CorrelationEngine {
    registry: Mutex<Registry>,
    format: Arc<dyn EnvelopeFormat>,
    metrics: Arc<dyn CorrelationMetrics>,
}

impl CorrelationEngine {
    /// Create an engine with empty tables that reads and writes `format`.
    #[must_use]
    pub fn new(format: Arc<dyn EnvelopeFormat>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            format,
            metrics: Arc::new(NoMetrics),
        }
    }

    /// Record engine activity in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn CorrelationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Envelope wire format.
    #[must_use]
    pub fn format(&self) -> &Arc<dyn EnvelopeFormat> {
        &self.format
    }

    /// Instrumentation sink.
    #[must_use]
    pub fn metrics(&self) -> &dyn CorrelationMetrics {
        self.metrics.as_ref()
    }

    /// Issue a fresh token and register a pending entry for it.
    ///
    /// Token issue and insertion happen under one lock acquisition.
    pub fn register(&self) -> (CorrelationToken, oneshot::Receiver<Envelope>) {
        let (tx, rx) = oneshot::channel();
        let mut registry = self.registry.lock();
        let token = registry.sequence.next_token();
        registry.pending.insert(token.clone(), tx);
        self.metrics.pending_requests(registry.pending.len());
        (token, rx)
    }

    /// Remove a pending entry without delivering anything.
    ///
    /// Returns `true` if the entry was still registered.
    pub fn deregister(&self, token: &CorrelationToken) -> bool {
        let mut registry = self.registry.lock();
        let removed = registry.pending.remove(token).is_some();
        if removed {
            self.metrics.pending_requests(registry.pending.len());
        }
        removed
    }

    /// Append a listener for unsolicited envelopes of `message_type`.
    pub fn subscribe(&self, message_type: MessageType, listener: EventListener) {
        self.registry
            .lock()
            .listeners
            .entry(message_type)
            .or_default()
            .push(listener);
        tracing::debug!(message_type, "Listener registered");
    }

    /// Route one inbound frame.
    ///
    /// Never fails: undecodable frames, replies nobody waits for, and events
    /// without listeners are dropped.
    pub fn dispatch(&self, kind: FrameKind, data: &[u8]) {
        if kind != FrameKind::Binary {
            tracing::debug!(len = data.len(), "Dropping non-binary frame");
            self.metrics.frame_dropped(DropReason::NonBinary);
            return;
        }

        let envelope = match self.format.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, len = data.len(), "Dropping undecodable frame");
                self.metrics.frame_dropped(DropReason::Decode);
                return;
            }
        };

        if let Some(token) = envelope.correlation_token().cloned() {
            self.deliver_reply(&token, envelope);
        } else {
            self.deliver_event(&envelope);
        }
    }

    fn deliver_reply(&self, token: &CorrelationToken, envelope: Envelope) {
        let waiter = {
            let mut registry = self.registry.lock();
            let waiter = registry.pending.remove(token);
            if waiter.is_some() {
                self.metrics.pending_requests(registry.pending.len());
            }
            waiter
        };

        match waiter {
            Some(tx) => {
                // Receiver may be gone if the caller gave up after removal.
                if tx.send(envelope).is_ok() {
                    self.metrics.reply_matched();
                } else {
                    tracing::debug!(%token, "Reply arrived as caller gave up");
                }
            }
            None => {
                tracing::debug!(
                    %token,
                    message_type = envelope.message_type(),
                    "Dropping reply without pending request"
                );
                self.metrics.frame_dropped(DropReason::UnmatchedReply);
            }
        }
    }

    fn deliver_event(&self, envelope: &Envelope) {
        let message_type = envelope.message_type();
        let listeners = self
            .registry
            .lock()
            .listeners
            .get(&message_type)
            .cloned()
            .unwrap_or_default();

        if listeners.is_empty() {
            tracing::trace!(message_type, "No listener for event");
            self.metrics.frame_dropped(DropReason::UnhandledEvent);
            return;
        }

        self.metrics.event_dispatched(message_type, listeners.len());
        for listener in &listeners {
            listener(envelope);
        }
    }

    /// Drop every pending entry; their callers observe a closed channel.
    ///
    /// Returns the number of entries dropped.
    pub fn fail_pending(&self) -> usize {
        let drained: Vec<_> = {
            let mut registry = self.registry.lock();
            let drained = registry.pending.drain().collect();
            self.metrics.pending_requests(0);
            drained
        };
        drained.len()
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.lock().pending.len()
    }

    /// Number of listeners registered for `message_type`.
    #[must_use]
    pub fn listener_count(&self, message_type: MessageType) -> usize {
        self.registry
            .lock()
            .listeners
            .get(&message_type)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for CorrelationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("CorrelationEngine")
            .field("pending", &registry.pending.len())
            .field("subscribed_types", &registry.listeners.len())
            .field("issued", &registry.sequence.issued())
            .finish()
    }
}
