use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use super::messages::{ConsumeRequest, ConsumeResponse};
use crate::nats::headers::extract_trace_context;
use tower::{Layer, Service};
use tracing::{error, field, info, info_span, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Tower layer that opens a span per consumed message, continuing the
/// publisher's trace, and logs the ack/nak outcome with its duration.
#[derive(Clone, Debug)]
pub struct NatsConsumeLayer {
    operation: String,
}

impl NatsConsumeLayer {
    /// `operation` names the span, e.g. `fanout_fields`.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

impl<S> Layer<S> for NatsConsumeLayer {
    type Service = NatsConsumeService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeService {
            inner: service,
            operation: self.operation.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsConsumeService<S> {
    inner: S,
    operation: String,
}

impl<S> Service<ConsumeRequest> for NatsConsumeService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_size = req.payload.len();

        let span = info_span!(
            target: "nats",
            "nats_consume",
            otel.name = %self.operation,
            messaging.system = "nats",
            messaging.operation = "process",
            messaging.destination.name = %subject,
            messaging.message.body.size = payload_size,
            messaging.message.delivery_count = req.delivered,
            otel.status_code = field::Empty,
        );
        if let Some(headers) = &req.headers {
            span.set_parent(extract_trace_context(headers));
        }

        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(response) => {
                        let outcome = response.outcome();
                        Span::current().record(
                            "otel.status_code",
                            if response.is_ack() { "OK" } else { "ERROR" },
                        );
                        info!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            outcome = %outcome,
                            duration_ms = %duration_ms,
                            "consumed from {subject} in {duration_ms}ms [{outcome}]"
                        );
                    }
                    Err(e) => {
                        Span::current().record("otel.status_code", "ERROR");
                        error!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to consume from {subject} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use tower::{ServiceBuilder, ServiceExt};

    #[derive(Clone)]
    struct NakService;

    impl Service<ConsumeRequest> for NakService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: ConsumeRequest) -> Self::Future {
            Box::pin(async move { Ok(ConsumeResponse::nak(format!("rejected {}", req.subject))) })
        }
    }

    #[tokio::test]
    async fn test_layer_passes_response_through() {
        let service = ServiceBuilder::new()
            .layer(NatsConsumeLayer::new("test_operation"))
            .service(NakService);

        let response = service
            .oneshot(ConsumeRequest::new("a.b", Bytes::from_static(b"x"), None))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::nak("rejected a.b"));
    }
}
