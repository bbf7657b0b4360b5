//! Configuration Module
//!
//! Configuration loading for the client and its transports.

mod settings;

pub use crate::domain::credentials::Credentials;

pub use settings::{
    ClientConfig, ConfigError, Endpoint, Environment, TransportChoice,
    TransportSettings,
};
