use crate::domain::MessageMetadata;
use async_nats::HeaderMap;
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

const TRACEPARENT: &str = "traceparent";
const TRACESTATE: &str = "tracestate";

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value.as_str());
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|v| v.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        vec![TRACEPARENT, TRACESTATE]
    }
}

/// Write the current span's W3C trace context into outgoing headers.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    global::get_text_map_propagator(|propagator| {
        let ctx = tracing::Span::current().context();
        propagator.inject_context(&ctx, &mut HeaderInjector(headers));
    });
}

/// Read the publisher's trace context from incoming headers.
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

/// Routing metadata as NATS headers.
pub fn headers_from_metadata(metadata: &MessageMetadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, value) in metadata {
        headers.insert(key.as_str(), value.as_str());
    }
    headers
}

/// Pick the given routing keys out of message headers; absent keys are skipped.
pub fn metadata_from_headers(headers: Option<&HeaderMap>, keys: &[&str]) -> MessageMetadata {
    let mut metadata = MessageMetadata::new();
    if let Some(headers) = headers {
        for key in keys {
            if let Some(value) = headers.get(*key) {
                metadata.insert((*key).to_string(), value.as_str().to_string());
            }
        }
    }
    metadata
}
