//! Tracing and OpenTelemetry Setup
//!
//! Installs the `tracing` subscriber for the client: a console layer, an
//! optional OTLP span exporter, and the per-connection span that ties
//! transport logs to the endpoint they belong to.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: Set to "false" to disable span export (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: ctrader-link)
//! - `CTRADER_ENV`: Exported as the `deployment.environment` resource attribute
//!
//! # Span Layout
//!
//! ```text
//! connection{transport=websocket endpoint=wss://demo.ctraderapi.com:5036}
//!   ├─ state transitions, reconnect attempts
//!   ├─ heartbeat probes
//!   └─ dispatch drops (undecodable, unmatched, unhandled)
//! ```
//!
//! The receive loop runs inside the connection span, so everything it logs
//! carries the transport kind and endpoint.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Span;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::infrastructure::config::Environment;
use crate::infrastructure::metrics::TransportKind;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "ctrader-link";

/// Filter directives applied on top of `RUST_LOG`.
const DEFAULT_DIRECTIVES: [&str; 3] = ["ctrader_link=info", "tungstenite=warn", "h2=warn"];

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Guard that flushes and shuts down span export when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported over OTLP.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Whether span export is enabled.
    pub enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
    /// Trading environment the client talks to.
    pub environment: Environment,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            environment: Environment::default(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("OTEL_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

        let environment = std::env::var("CTRADER_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        Self {
            enabled,
            otlp_endpoint,
            service_name,
            environment,
        }
    }

    fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new("deployment.environment", self.environment.as_str()),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build()
    }
}

/// Span wrapping everything one transport does.
///
/// Used as the parent of the receive loop, so reconnect, heartbeat and
/// dispatch logs carry `transport` and `endpoint` fields.
#[must_use]
pub fn connection_span(transport: TransportKind, endpoint: &str) -> Span {
    tracing::info_span!("connection", transport = transport.as_str(), endpoint)
}

/// Initialize telemetry with default configuration from environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
/// When the guard is dropped, OpenTelemetry will be properly shut down.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Initialize telemetry with custom configuration.
///
/// If the OTLP exporter cannot be built, logging still comes up and spans
/// are not exported.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let tracer_provider = if config.enabled {
        build_tracer_provider(&config)
            .map_err(|e| eprintln!("OTLP exporter unavailable, spans will not be exported: {e}"))
            .ok()
    } else {
        None
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(build_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    if tracer_provider.is_some() {
        tracing::debug!(
            endpoint = %config.otlp_endpoint,
            environment = config.environment.as_str(),
            "Exporting spans over OTLP"
        );
    }

    TelemetryGuard { tracer_provider }
}

/// `RUST_LOG` plus the crate's default directives.
fn build_filter() -> EnvFilter {
    DEFAULT_DIRECTIVES
        .iter()
        .filter_map(|directive| directive.parse().ok())
        .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
}

fn build_tracer_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider, ExporterBuildError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .build())
}

// =============================================================================
// Tests
// =============================================================================
