//! Envelope Codec
//!
//! Serializes the outer `ProtoMessage` envelope used by every cTrader Open API
//! frame. Only the three envelope fields are known here; payload bytes pass
//! through untouched.
//!
//! # Wire Format
//!
//! ```text
//! message ProtoMessage {
//!     required uint32 payloadType = 1;
//!     optional bytes  payload     = 2;
//!     optional string clientMsgId = 3;
//! }
//! ```

use prost::Message;

use crate::application::ports::{EnvelopeFormat, MalformedEnvelope};
use crate::domain::correlation::CorrelationToken;
use crate::domain::envelope::{Envelope, MessageType};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Protobuf decoding failed.
    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Protobuf rendering of the envelope.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoMessage {
    /// Message type tag.
    #[prost(uint32, required, tag = "1")]
    pub payload_type: u32,
    /// Opaque payload.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub payload: Option<Vec<u8>>,
    /// Correlation token echoed by the server.
    #[prost(string, optional, tag = "3")]
    pub client_msg_id: Option<String>,
}

/// Stateless envelope codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode envelope fields into protobuf bytes.
    ///
    /// An absent or empty token is left off the wire.
    #[must_use]
    pub fn encode(
        &self,
        message_type: MessageType,
        payload: &[u8],
        token: Option<&CorrelationToken>,
    ) -> Vec<u8> {
        ProtoMessage {
            payload_type: message_type,
            payload: Some(payload.to_vec()),
            client_msg_id: token
                .filter(|t| !t.is_empty())
                .map(|t| t.as_str().to_string()),
        }
        .encode_to_vec()
    }

    /// Encode a complete envelope.
    #[must_use]
    pub fn encode_envelope(&self, envelope: &Envelope) -> Vec<u8> {
        self.encode(
            envelope.message_type(),
            envelope.payload(),
            envelope.correlation_token(),
        )
    }

    /// Decode protobuf bytes into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid `ProtoMessage`.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope, CodecError> {
        let message = ProtoMessage::decode(data)?;
        let payload = message.payload.unwrap_or_default();

        Ok(match message.client_msg_id {
            Some(token) if !token.is_empty() => {
                Envelope::correlated(message.payload_type, payload, token)
            }
            _ => Envelope::event(message.payload_type, payload),
        })
    }
}

impl From<CodecError> for MalformedEnvelope {
    fn from(err: CodecError) -> Self {
        Self(err.to_string())
    }
}

impl EnvelopeFormat for EnvelopeCodec {
    fn encode(&self, envelope: &Envelope) -> Vec<u8> {
        self.encode_envelope(envelope)
    }

    fn decode(&self, data: &[u8]) -> Result<Envelope, MalformedEnvelope> {
        Ok(Self::decode(self, data)?)
    }
}
