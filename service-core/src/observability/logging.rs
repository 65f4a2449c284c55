use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, runtime, trace as sdktrace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn otlp_tracer(service_name: &str, endpoint: &str) -> Result<sdktrace::Tracer, String> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
            KeyValue::new("service.name", service_name.to_string()),
        ])))
        .install_batch(runtime::Tokio)
        .map_err(|e| e.to_string())
}

/// Install the global subscriber: env filter and JSON logs, plus span
/// export when an OTLP endpoint is given.
///
/// A collector that cannot be set up does not stop the service; logs still
/// flow and the failure is reported once the subscriber is live.
pub fn init_tracing(service_name: &str, log_level: &str, otlp_endpoint: Option<&str>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let (telemetry, otlp_failure) = match otlp_endpoint.map(|e| (e, otlp_tracer(service_name, e))) {
        Some((_, Ok(tracer))) => (Some(tracing_opentelemetry::layer().with_tracer(tracer)), None),
        Some((endpoint, Err(e))) => (None, Some((endpoint, e))),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(telemetry)
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true),
        )
        .init();

    if let Some((endpoint, error)) = otlp_failure {
        tracing::warn!(
            service = service_name,
            endpoint,
            error = %error,
            "OTLP exporter unavailable, spans will not be exported"
        );
    }
}
