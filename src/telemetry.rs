//! OpenTelemetry wiring for the operator binary
//!
//! Traces are exported over OTLP/gRPC to the endpoint named by
//! `OTEL_EXPORTER_OTLP_ENDPOINT`. When the exporter cannot be installed the
//! operator keeps running with plain log output.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;

/// Service name reported on every exported span
pub const SERVICE_NAME: &str = "kubeedge-apps-operator";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// Build the OpenTelemetry tracing layer for the given subscriber.
///
/// Returns `None` if the OTLP pipeline fails to install.
pub fn init_telemetry<S>(_subscriber: &S) -> Option<OpenTelemetryLayer<S, sdktrace::Tracer>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])))
        .install_batch(runtime::Tokio);

    match tracer {
        Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
        Err(e) => {
            eprintln!("failed to install OTLP pipeline: {e}");
            None
        }
    }
}

/// Flush pending spans before exit
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
