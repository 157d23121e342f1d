use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use super::messages::{PublishRequest, PublishResponse};
use crate::nats::headers::inject_trace_context;
use crate::nats::JetStreamPublisher;
use tower::{Layer, Service, ServiceBuilder};
use tracing::{error, field, info, info_span, Instrument, Span};

/// Innermost service: the acknowledged JetStream publish itself.
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);

        Box::pin(async move {
            publisher
                .publish_with_headers(req.subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse {
                subject: req.subject,
            })
        })
    }
}

/// Tower layer that traces each publish, injects the trace context into the
/// message headers and logs the outcome.
#[derive(Clone, Debug)]
pub struct NatsPublishLayer {
    service_name: String,
}

impl NatsPublishLayer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl<S> Layer<S> for NatsPublishLayer {
    type Service = NatsPublishTelemetryService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsPublishTelemetryService {
            inner: service,
            service_name: self.service_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsPublishTelemetryService<S> {
    inner: S,
    service_name: String,
}

impl<S> Service<PublishRequest> for NatsPublishTelemetryService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PublishRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_size = req.payload.len();

        let span = info_span!(
            target: "nats",
            "nats_publish",
            otel.name = "nats_publish",
            messaging.system = "nats",
            messaging.operation = "publish",
            messaging.destination.name = %subject,
            messaging.message.body.size = payload_size,
            service.name = %self.service_name,
            otel.status_code = field::Empty,
        );

        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                inject_trace_context(&mut req.headers);
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(_) => {
                        Span::current().record("otel.status_code", "OK");
                        info!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            "published to {subject} in {duration_ms}ms"
                        );
                    }
                    Err(e) => {
                        Span::current().record("otel.status_code", "ERROR");
                        error!(
                            subject = %subject,
                            payload_bytes = payload_size,
                            duration_ms = %duration_ms,
                            error = %e,
                            "failed to publish to {subject} in {duration_ms}ms: {e}"
                        );
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}

pub type LayeredPublisher = NatsPublishTelemetryService<NatsPublishService>;

/// Publisher stack used by every producer: telemetry around the raw publish.
pub fn layered_publisher(
    publisher: Arc<dyn JetStreamPublisher>,
    service_name: impl Into<String>,
) -> LayeredPublisher {
    ServiceBuilder::new()
        .layer(NatsPublishLayer::new(service_name))
        .service(NatsPublishService::new(publisher))
}
