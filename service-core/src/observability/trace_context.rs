//! Outbound trace propagation for reqwest calls between services.
//!
//! The W3C `traceparent`/`tracestate` pair comes from the OpenTelemetry
//! context of the current span; `x-request-id` carries the caller's
//! correlation id.

use opentelemetry::propagation::{Injector, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::RequestBuilder;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

/// Write the current span's trace context into `headers`. Nothing is
/// written when the span has no valid OpenTelemetry context, e.g. when no
/// OTLP endpoint was configured.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let context = tracing::Span::current().context();
    TraceContextPropagator::new().inject_context(&context, &mut HeaderInjector(headers));
}

/// Decorates outbound requests with trace headers.
pub trait TracedRequestExt {
    fn traced(self) -> RequestBuilder;
    fn traced_with_request_id(self, request_id: &str) -> RequestBuilder;
}

impl TracedRequestExt for RequestBuilder {
    fn traced(self) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        self.headers(headers)
    }

    fn traced_with_request_id(self, request_id: &str) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        match HeaderValue::from_str(request_id) {
            Ok(value) => {
                headers.insert(REQUEST_ID_HEADER, value);
            }
            Err(_) => tracing::debug!(request_id, "Request id is not a valid header value"),
        }
        self.headers(headers)
    }
}
