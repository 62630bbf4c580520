//! OpenTelemetry export (feature `telemetry`)
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Service name (default: gearflow-scheduler)
//!
//! ```text
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//! OTEL_SERVICE_NAME=gearflow-dev \
//!     gearflow-scheduler
//! ```

use anyhow::Result;
use tracing_subscriber::{Layer, Registry};

const ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
const SERVICE_NAME_ENV: &str = "OTEL_SERVICE_NAME";
const DEFAULT_SERVICE_NAME: &str = "gearflow-scheduler";

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// What the exporter was configured with, for logging once the subscriber is up
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryStatus {
    Disabled,
    /// Endpoint configured but the binary was built without `telemetry`
    Unsupported { endpoint: String },
    Enabled { endpoint: String, service_name: String },
}

pub fn endpoint() -> Option<String> {
    std::env::var(ENDPOINT_ENV).ok().filter(|e| !e.trim().is_empty())
}

pub fn service_name() -> String {
    std::env::var(SERVICE_NAME_ENV).unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string())
}

/// Build the OTLP tracing layer if an endpoint is configured
///
/// Runs before the subscriber exists, so it reports through the returned
/// status instead of logging.
pub fn otel_layer() -> Result<(Option<BoxedLayer>, TelemetryStatus)> {
    let Some(endpoint) = endpoint() else {
        return Ok((None, TelemetryStatus::Disabled));
    };

    #[cfg(feature = "telemetry")]
    {
        let service_name = service_name();
        let layer = build_layer(&endpoint, &service_name)?;
        Ok((
            Some(layer),
            TelemetryStatus::Enabled {
                endpoint,
                service_name,
            },
        ))
    }

    #[cfg(not(feature = "telemetry"))]
    {
        Ok((None, TelemetryStatus::Unsupported { endpoint }))
    }
}

#[cfg(feature = "telemetry")]
fn build_layer(endpoint: &str, service_name: &str) -> Result<BoxedLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.to_string(),
        )]))
        .build();
    let tracer = provider.tracer(service_name.to_string());
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer).boxed())
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_default() {
        if std::env::var(SERVICE_NAME_ENV).is_err() {
            assert_eq!(service_name(), DEFAULT_SERVICE_NAME);
        }
    }

    #[test]
    fn test_disabled_without_endpoint() {
        if endpoint().is_none() {
            let (layer, status) = otel_layer().unwrap();
            assert!(layer.is_none());
            assert_eq!(status, TelemetryStatus::Disabled);
        }
    }
}
