//! Correlation Client
//!
//! Request/response and publish/subscribe over a single `Transport`.
//!
//! # Request Flow
//!
//! ```text
//! request() ─► register token ─► send ─► wait ─┬─► reply (matched by token)
//!                                              ├─► cancelled / timed out
//!                                              └─► client closed
//! ```
//!
//! The pending entry is removed when the wait ends for any reason, so a late
//! reply finds nothing and is dropped by `dispatch`.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::engine::{CorrelationEngine, EventListener};
use crate::application::ports::{FrameKind, Transport, TransportError};
use crate::domain::correlation::CorrelationToken;
use crate::domain::credentials::Credentials;
use crate::domain::envelope::{Envelope, MessageType};

/// Default deadline for `request_default`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `close` waits for the receive loop to wind down.
const LISTEN_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport refused or failed the write.
    #[error("send failed: {0}")]
    Send(#[from] TransportError),

    /// Caller cancelled the wait.
    #[error("request cancelled")]
    Cancelled,

    /// Deadline elapsed before a reply arrived.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Client was closed while the request was outstanding.
    #[error("client closed")]
    Closed,
}

/// Removes the pending entry when the caller stops waiting.
struct PendingGuard<'a> {
    engine: &'a CorrelationEngine,
    token: CorrelationToken,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.engine.deregister(&self.token) {
            tracing::debug!(token = %self.token, "Abandoned pending request");
        }
    }
}

/// Correlation client bound to one transport.
pub struct Client {
    engine: Arc<CorrelationEngine>,
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    request_timeout: Duration,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Bind a client to an existing transport.
    ///
    /// Registers `engine` as the transport's message handler. The receive
    /// loop is not started; call [`Client::spawn_listen`] or drive
    /// `Transport::listen` yourself.
    #[must_use]
    pub fn new(
        engine: CorrelationEngine,
        transport: Arc<dyn Transport>,
        credentials: Credentials,
    ) -> Self {
        let engine = Arc::new(engine);

        let weak: Weak<CorrelationEngine> = Arc::downgrade(&engine);
        transport.on_message(Arc::new(move |kind: FrameKind, data: &[u8]| {
            if let Some(engine) = weak.upgrade() {
                engine.dispatch(kind, data);
            }
        }));

        Self {
            engine,
            transport,
            credentials,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            listen_task: Mutex::new(None),
        }
    }

    /// Set the deadline used by `request_default`.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Start the transport's receive loop on the Tokio runtime.
    ///
    /// Does nothing if the loop was already started.
    pub fn spawn_listen(&self) {
        self.spawn_listen_in(tracing::Span::current());
    }

    /// Start the receive loop inside `span`, so its logs carry the span's
    /// fields.
    ///
    /// Does nothing if the loop was already started.
    pub fn spawn_listen_in(&self, span: tracing::Span) {
        let mut task = self.listen_task.lock();
        if task.is_some() {
            return;
        }

        let transport = Arc::clone(&self.transport);
        *task = Some(tokio::spawn(
            async move {
                if let Err(e) = transport.listen().await {
                    tracing::error!(error = %e, "Transport receive loop ended");
                }
            }
            .instrument(span),
        ));
    }

    /// Send a request and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `Send` if the transport rejects the write
    /// - `Cancelled` if `cancel` fires first
    /// - `Closed` if the client is closed while waiting
    pub async fn request(
        &self,
        cancel: &CancellationToken,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<Envelope, ClientError> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let started = Instant::now();
        let (token, reply) = self.engine.register();
        let frame = self
            .engine
            .format()
            .encode(&Envelope::correlated(message_type, payload, token.clone()));
        let guard = PendingGuard {
            engine: &self.engine,
            token,
        };

        tracing::debug!(message_type, token = %guard.token, "Sending request");
        if let Err(e) = self.transport.send(FrameKind::Binary, frame).await {
            self.engine.metrics().send_failure();
            tracing::warn!(message_type, error = %e, "Request send failed");
            return Err(ClientError::Send(e));
        }
        self.engine.metrics().request_sent(message_type);

        let result = tokio::select! {
            biased;
            reply = reply => reply.map_err(|_| ClientError::Closed),
            () = cancel.cancelled() => Err(ClientError::Cancelled),
        };

        if result.is_ok() {
            self.engine.metrics().request_duration(started.elapsed());
        }
        result
    }

    /// Send a request and wait at most `timeout` for its reply.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the deadline elapses, otherwise as `request`.
    pub async fn request_with_timeout(
        &self,
        timeout: Duration,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<Envelope, ClientError> {
        let cancel = CancellationToken::new();
        tokio::time::timeout(timeout, self.request(&cancel, message_type, payload))
            .await
            .unwrap_or(Err(ClientError::Timeout(timeout)))
    }

    /// Send a request with the configured default deadline.
    ///
    /// # Errors
    ///
    /// As `request_with_timeout`.
    pub async fn request_default(
        &self,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Result<Envelope, ClientError> {
        self.request_with_timeout(self.request_timeout, message_type, payload)
            .await
    }

    /// Register a listener for unsolicited envelopes of `message_type`.
    ///
    /// Listeners run on the receive loop in registration order and must not
    /// block.
    pub fn subscribe<F>(&self, message_type: MessageType, listener: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.engine
            .subscribe(message_type, Arc::new(listener) as EventListener);
    }

    /// Route one inbound frame as if the transport had delivered it.
    pub fn dispatch(&self, kind: FrameKind, data: &[u8]) {
        self.engine.dispatch(kind, data);
    }

    /// Close the transport and release every waiting request.
    ///
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails to close.
    pub async fn close(&self) -> Result<(), ClientError> {
        let closed = self.transport.close().await;

        let abandoned = self.engine.fail_pending();
        if abandoned > 0 {
            tracing::info!(abandoned, "Released pending requests on close");
        }

        let task = self.listen_task.lock().take();
        if let Some(task) = task
            && tokio::time::timeout(LISTEN_SHUTDOWN_GRACE, task).await.is_err()
        {
            tracing::warn!("Receive loop did not stop within grace period");
        }

        closed.map_err(ClientError::from)
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.engine.pending_count()
    }

    /// Application credentials for handshake requests.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Correlation engine behind this client.
    #[must_use]
    pub const fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(task) = self.listen_task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("engine", &self.engine)
            .field("credentials", &self.credentials)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
