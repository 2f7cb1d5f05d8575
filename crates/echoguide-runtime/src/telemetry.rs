//! Logging and trace export for the guidance process.
//!
//! [`init_tracing`] installs the global `tracing` subscriber: an
//! [`EnvFilter`], a stderr formatter (compact or JSON lines) and, when a
//! collector endpoint is known, an OTLP/HTTP span exporter.  Stdout is left
//! to the program's own output.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Filter directives; falls back to [`TelemetryConfig::default_filter`]. |
//! | `ECHOGUIDE_LOG_FORMAT=json` | Newline-delimited JSON instead of compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector base URL; enables span export. |
//!
//! # Example
//!
//! ```rust,no_run
//! use echoguide_runtime::telemetry::{init_tracing, TelemetryConfig};
//!
//! let _guard = init_tracing(&TelemetryConfig::from_env("echoguide"));
//! ```

use std::str::FromStr;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FORMAT_VAR: &str = "ECHOGUIDE_LOG_FORMAT";
const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?} (expected compact|json)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute on exported spans.
    pub service_name: String,
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset or unparsable.
    pub default_filter: String,
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_format: LogFormat::Compact,
            default_filter: "info".to_string(),
            otlp_endpoint: None,
        }
    }

    /// Read the log format and collector endpoint from the environment.
    /// Unknown format values fall back to compact.
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let mut cfg = Self::new(service_name);
        if let Ok(v) = std::env::var(LOG_FORMAT_VAR) {
            cfg.log_format = v.parse().unwrap_or_default();
        }
        cfg.otlp_endpoint = std::env::var(OTLP_ENDPOINT_VAR)
            .ok()
            .filter(|e| !e.trim().is_empty());
        cfg
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialisation
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global subscriber.  Hold the returned guard until exit; it
/// flushes exported spans when dropped.
///
/// A second call (or a subscriber installed elsewhere) leaves the existing
/// one in place.
pub fn init_tracing(config: &TelemetryConfig) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(&config.service_name, endpoint));
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("echoguide")));

    let (json, compact) = match config.log_format {
        LogFormat::Json => (Some(fmt::layer().json().with_writer(std::io::stderr)), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact().with_writer(std::io::stderr))),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(
            format = ?config.log_format,
            otlp = config.otlp_endpoint.is_some(),
            "tracing initialised"
        );
    }

    TelemetryGuard { provider }
}

/// Shuts the span exporter down on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[echoguide] span exporter shutdown failed: {e}");
        }
    }
}

fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[echoguide] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the CLI initialises tracing before its runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn new_config_has_no_exporter() {
        let cfg = TelemetryConfig::new("test");
        assert_eq!(cfg.log_format, LogFormat::Compact);
        assert_eq!(cfg.default_filter, "info");
        assert!(cfg.otlp_endpoint.is_none());
    }

    #[test]
    fn init_without_endpoint_exports_nothing() {
        let guard = init_tracing(&TelemetryConfig::new("test"));
        assert!(!guard.is_exporting());
        // A repeat call must not panic on the already-installed subscriber.
        let again = init_tracing(&TelemetryConfig::new("test"));
        assert!(!again.is_exporting());
    }
}
