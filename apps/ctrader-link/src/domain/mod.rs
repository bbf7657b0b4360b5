//! Domain Layer - Envelope and correlation types.
//!
//! This layer contains the message envelope carried over every transport
//! and the correlation tokens used to pair replies with requests. Nothing
//! here performs I/O or knows about a concrete wire schema.

/// Outer message envelope and well-known message types.
pub mod envelope;

/// Correlation tokens and their generator.
pub mod correlation;

/// Application identity for handshake requests.
pub mod credentials;
