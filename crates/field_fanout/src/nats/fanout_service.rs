use crate::domain::{FieldFanoutTransformer, FANOUT_REQUIRED_METADATA};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::warn;

/// Tower service fanning out one raw payload.
///
/// Always acks: malformed payloads are dropped and per-field publish
/// failures never cause the whole document to be redelivered.
#[derive(Clone)]
pub struct FanoutService {
    transformer: Arc<FieldFanoutTransformer>,
    output_subject: String,
}

impl FanoutService {
    pub fn new(transformer: Arc<FieldFanoutTransformer>, output_subject: impl Into<String>) -> Self {
        Self {
            transformer,
            output_subject: output_subject.into(),
        }
    }
}

impl Service<ConsumeRequest> for FanoutService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let transformer = Arc::clone(&self.transformer);
        let output_subject = self.output_subject.clone();

        Box::pin(async move {
            let metadata = req.metadata(FANOUT_REQUIRED_METADATA);

            if let Err(e) = transformer
                .transform(&output_subject, &metadata, &req.payload)
                .await
            {
                warn!(subject = %req.subject, error = %e, "dropping raw payload");
            }

            Ok(ConsumeResponse::Ack)
        })
    }
}
