//! Application Services
//!
//! - `CorrelationEngine`: pending-request registry and event routing
//! - `Client`: request/subscribe API bound to one transport

pub mod client;
pub mod engine;

pub use client::{Client, ClientError, DEFAULT_REQUEST_TIMEOUT};
pub use engine::{CorrelationEngine, EventListener};
