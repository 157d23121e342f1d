use crate::domain::{TypedPropertyWriter, WRITER_METADATA_KEYS};
use common::domain::DomainError;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{error, warn};

/// Tower service writing one routed message to the twin.
///
/// Messages without complete routing metadata are acked and dropped. Every
/// other failure is nak'd so redelivery is bounded by the consumer.
#[derive(Clone)]
pub struct PropertyWriteService {
    writer: Arc<TypedPropertyWriter>,
}

impl PropertyWriteService {
    pub fn new(writer: Arc<TypedPropertyWriter>) -> Self {
        Self { writer }
    }
}

impl Service<ConsumeRequest> for PropertyWriteService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let writer = Arc::clone(&self.writer);

        Box::pin(async move {
            let metadata = req.metadata(WRITER_METADATA_KEYS);

            let message = match writer.decode(&metadata, &req.payload) {
                Ok(message) => message,
                Err(e @ (DomainError::Validation(_) | DomainError::InvalidThingId(_))) => {
                    warn!(subject = %req.subject, error = %e, "dropping routed message");
                    return Ok(ConsumeResponse::Ack);
                }
                Err(e) => {
                    error!(subject = %req.subject, error = %e, "failed to decode routed message");
                    return Ok(ConsumeResponse::nak(e.to_string()));
                }
            };

            match writer.write(&message).await {
                Ok(_) => Ok(ConsumeResponse::Ack),
                Err(e) => {
                    error!(
                        thing_id = %message.thing_id,
                        feature_id = %message.feature_id,
                        property = %message.property,
                        delivered = req.delivered,
                        error = %e,
                        "failed to write property"
                    );
                    Ok(ConsumeResponse::nak(e.to_string()))
                }
            }
        })
    }
}
