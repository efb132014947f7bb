//! Logging setup and optional OpenTelemetry export

use crate::config::{LoggingConfig, TelemetryConfig};
use crate::{Result, SafeOutError};
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the exporters alive; flushes and shuts them down on drop
#[derive(Default)]
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down trace exporter: {e}");
            }
        }
        if let Some(provider) = self.logger_provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shut down log exporter: {e}");
            }
        }
    }
}

/// `RUST_LOG` wins over the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},hyper=warn,h2=warn,fjall=warn")))
}

/// Exporter traffic must not feed back into the exporter
fn export_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::INFO)
        .with_target("hyper", LevelFilter::OFF)
        .with_target("h2", LevelFilter::OFF)
        .with_target("reqwest", LevelFilter::OFF)
        .with_target("opentelemetry", LevelFilter::OFF)
}

fn otlp_endpoint(base: &str, signal: &str) -> String {
    format!("{}/v1/{signal}", base.trim_end_matches('/'))
}

fn otel_layers(config: &TelemetryConfig) -> Result<(Vec<BoxedLayer>, TelemetryGuard)> {
    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .with_attribute(KeyValue::new(SERVICE_VERSION, crate::VERSION))
        .build();

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint(&config.otlp_endpoint, "traces"))
        .build()
        .map_err(|e| SafeOutError::config(format!("Failed to build span exporter: {e}")))?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_resource(resource.clone())
        .build();

    let log_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint(&config.otlp_endpoint, "logs"))
        .build()
        .map_err(|e| SafeOutError::config(format!("Failed to build log exporter: {e}")))?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_batch_exporter(log_exporter)
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(config.service_name.clone());
    let layers: Vec<BoxedLayer> = vec![
        tracing_opentelemetry::layer()
            .with_tracer(tracer)
            .with_filter(export_filter())
            .boxed(),
        OpenTelemetryTracingBridge::new(&logger_provider)
            .with_filter(export_filter())
            .boxed(),
    ];

    Ok((
        layers,
        TelemetryGuard {
            tracer_provider: Some(tracer_provider),
            logger_provider: Some(logger_provider),
        },
    ))
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init(logging: &LoggingConfig, telemetry: &TelemetryConfig) -> Result<TelemetryGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(match logging.format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().boxed(),
        _ => tracing_subscriber::fmt::layer().boxed(),
    });

    let guard = if telemetry.otlp_enabled {
        let (otel, guard) = otel_layers(telemetry)?;
        layers.extend(otel);
        guard
    } else {
        TelemetryGuard::default()
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(&logging.level))
        .try_init()
        .map_err(|e| SafeOutError::config(format!("Failed to install tracing subscriber: {e}")))?;

    if guard.is_exporting() {
        tracing::info!("Exporting telemetry to {}", telemetry.otlp_endpoint);
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otlp_endpoint() {
        assert_eq!(
            otlp_endpoint("http://localhost:4318/", "traces"),
            "http://localhost:4318/v1/traces"
        );
        assert_eq!(
            otlp_endpoint("http://collector:4318", "logs"),
            "http://collector:4318/v1/logs"
        );
    }

    #[test]
    fn test_disabled_guard_is_inert() {
        let guard = TelemetryGuard::default();
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
