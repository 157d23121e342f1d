use crate::domain::ProvisioningService;
use common::domain::ThingId;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error, warn};

/// Tower service for thing activation messages.
///
/// The payload is a UTF-8 thing id. Unparseable ids and permanent
/// resolution failures are acked; only transient failures are redelivered.
#[derive(Clone)]
pub struct ActivationService {
    provisioning: Arc<ProvisioningService>,
}

impl ActivationService {
    pub fn new(provisioning: Arc<ProvisioningService>) -> Self {
        Self { provisioning }
    }
}

impl Service<ConsumeRequest> for ActivationService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let provisioning = Arc::clone(&self.provisioning);

        Box::pin(async move {
            let thing_id = match parse_thing_id(&req.payload) {
                Some(id) => id,
                None => {
                    warn!(subject = %req.subject, "activation payload is not a thing id, dropping");
                    return Ok(ConsumeResponse::Ack);
                }
            };

            debug!(thing_id = %thing_id, "processing thing activation");

            match provisioning.provision_thing(&thing_id).await {
                Ok(report) => {
                    if !report.is_complete() {
                        warn!(
                            thing_id = %thing_id,
                            failed = report.failed.len(),
                            "thing partially provisioned"
                        );
                    }
                    Ok(ConsumeResponse::Ack)
                }
                Err(e) if e.is_transient() => {
                    warn!(thing_id = %thing_id, error = %e, "transient provisioning failure");
                    Ok(ConsumeResponse::nak(e.to_string()))
                }
                Err(e) => {
                    error!(thing_id = %thing_id, error = %e, "provisioning failed, dropping activation");
                    Ok(ConsumeResponse::Ack)
                }
            }
        })
    }
}

fn parse_thing_id(payload: &[u8]) -> Option<ThingId> {
    std::str::from_utf8(payload).ok()?.trim().parse().ok()
}
