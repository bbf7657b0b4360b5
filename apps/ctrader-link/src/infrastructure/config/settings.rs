//! Client Configuration Settings
//!
//! Configuration types for the client, loaded from environment variables.

use std::time::Duration;

use crate::domain::credentials::Credentials;
use crate::infrastructure::transport::DEFAULT_MAX_FRAME_LENGTH;

/// WebSocket port of the Open API proxies.
const WEBSOCKET_PORT: u16 = 5036;

/// TCP port of the Open API proxies.
const TCP_PORT: u16 = 5035;

/// Trading environment (demo vs live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Demo environment (simulated accounts).
    #[default]
    Demo,
    /// Live environment (real money).
    Live,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "LIVE" => Self::Live,
            _ => Self::Demo,
        }
    }

    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Live => "live",
        }
    }

    /// Get the Open API proxy host for this environment.
    #[must_use]
    pub const fn host(&self) -> &'static str {
        match self {
            Self::Demo => "demo.ctraderapi.com",
            Self::Live => "live.ctraderapi.com",
        }
    }
}

/// Transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportChoice {
    /// Persistent WebSocket with reconnect and heartbeat.
    #[default]
    WebSocket,
    /// Length-prefixed TCP stream.
    Tcp,
}

impl TransportChoice {
    /// Parse transport from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tcp" => Self::Tcp,
            _ => Self::WebSocket,
        }
    }
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// WebSocket URL (`wss://host:port`).
    WebSocket(String),
    /// TCP socket address (`host:port`).
    Tcp(String),
}

impl Endpoint {
    /// Default endpoint for an environment and transport.
    #[must_use]
    pub fn for_environment(environment: Environment, transport: TransportChoice) -> Self {
        match transport {
            TransportChoice::WebSocket => {
                Self::WebSocket(format!("wss://{}:{WEBSOCKET_PORT}", environment.host()))
            }
            TransportChoice::Tcp => Self::Tcp(format!("{}:{TCP_PORT}", environment.host())),
        }
    }

    /// Get the URL or address string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::WebSocket(url) => url,
            Self::Tcp(addr) => addr,
        }
    }
}

/// Transport connection settings.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Heartbeat probe interval (zero disables).
    pub heartbeat_interval: Duration,
    /// Constant delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Whether the persistent transport redials after a failure.
    pub auto_reconnect: bool,
    /// Largest frame accepted on the TCP transport.
    pub max_frame_length: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 0, // Unlimited
            auto_reconnect: true,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Trading environment.
    pub environment: Environment,
    /// Endpoint to connect to.
    pub endpoint: Endpoint,
    /// Application credentials.
    pub credentials: Credentials,
    /// Transport settings.
    pub transport: TransportSettings,
    /// Default deadline for requests.
    pub request_timeout: Duration,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Create a configuration with default settings for an endpoint.
    #[must_use]
    pub fn new(endpoint: Endpoint, credentials: Credentials) -> Self {
        Self {
            environment: Environment::default(),
            endpoint,
            credentials,
            transport: TransportSettings::default(),
            request_timeout: Duration::from_secs(30),
            metrics_port: 0,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = required_env("CTRADER_CLIENT_ID")?;
        let client_secret = required_env("CTRADER_CLIENT_SECRET")?;
        let access_token = required_env("CTRADER_ACCESS_TOKEN")?;

        let environment = std::env::var("CTRADER_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let transport_choice = std::env::var("CTRADER_TRANSPORT")
            .map(|s| TransportChoice::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let endpoint = match std::env::var("CTRADER_ENDPOINT") {
            Ok(value) if !value.is_empty() => match transport_choice {
                TransportChoice::WebSocket => Endpoint::WebSocket(value),
                TransportChoice::Tcp => Endpoint::Tcp(value),
            },
            _ => Endpoint::for_environment(environment, transport_choice),
        };

        let defaults = TransportSettings::default();
        let transport = TransportSettings {
            heartbeat_interval: parse_env_duration_secs(
                "CTRADER_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            reconnect_delay: parse_env_duration_millis(
                "CTRADER_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            ),
            max_reconnect_attempts: parse_env(
                "CTRADER_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            auto_reconnect: parse_env_bool("CTRADER_AUTO_RECONNECT", defaults.auto_reconnect)?,
            max_frame_length: parse_env("CTRADER_MAX_FRAME_LENGTH", defaults.max_frame_length),
        };

        Ok(Self {
            environment,
            endpoint,
            credentials: Credentials::new(client_id, client_secret, access_token),
            transport,
            request_timeout: parse_env_duration_secs(
                "CTRADER_REQUEST_TIMEOUT_SECS",
                Duration::from_secs(30),
            ),
            metrics_port: parse_env("CTRADER_METRICS_PORT", 0),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    let value = std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Ok(value) = std::env::var(key) else {
        return Ok(default);
    };
    parse_bool(&value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
