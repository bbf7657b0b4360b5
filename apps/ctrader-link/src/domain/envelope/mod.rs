//! Message Envelope
//!
//! The outer structure carried by every frame: a numeric message type, an
//! opaque payload and an optional correlation token. Payload contents are
//! never interpreted here.
//!
//! # Invariant
//!
//! The correlation token is present (and non-empty) exactly when the envelope
//! answers a request. Envelopes without a token are unsolicited events.

use crate::domain::correlation::CorrelationToken;

/// Numeric message-type tag.
pub type MessageType = u32;

/// Heartbeat event type (`PROTO_HEARTBEAT_EVENT`).
pub const HEARTBEAT_EVENT: MessageType = 51;

/// Error response type (`PROTO_OA_ERROR_RES`).
pub const ERROR_RES: MessageType = 2142;

/// Version request type (`PROTO_OA_VERSION_REQ`).
pub const VERSION_REQ: MessageType = 2104;

/// A decoded message envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    message_type: MessageType,
    payload: Vec<u8>,
    correlation_token: Option<CorrelationToken>,
}

impl Envelope {
    /// Create an unsolicited envelope (no correlation token).
    #[must_use]
    pub const fn event(message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            payload,
            correlation_token: None,
        }
    }

    /// Create an envelope correlated with a request.
    ///
    /// An empty token is normalized to no token, so the result is an event.
    #[must_use]
    pub fn correlated(
        message_type: MessageType,
        payload: Vec<u8>,
        token: impl Into<CorrelationToken>,
    ) -> Self {
        let token = token.into();
        Self {
            message_type,
            payload,
            correlation_token: (!token.is_empty()).then_some(token),
        }
    }

    /// Create a heartbeat probe envelope.
    #[must_use]
    pub const fn heartbeat() -> Self {
        Self::event(HEARTBEAT_EVENT, Vec::new())
    }

    /// Get the message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Get the opaque payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the envelope and return its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Get the correlation token, if any.
    #[must_use]
    pub const fn correlation_token(&self) -> Option<&CorrelationToken> {
        self.correlation_token.as_ref()
    }

    /// Check whether this envelope is an unsolicited event.
    #[must_use]
    pub const fn is_event(&self) -> bool {
        self.correlation_token.is_none()
    }
}
