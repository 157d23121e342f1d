use crate::domain::ProvisioningService;
use crate::nats::ActivationService;
use anyhow::Result;
use common::nats::{
    ConsumerSettings, JetStreamConsumer, NatsConsumeLayer, NatsConsumeService, TowerConsumer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::debug;

type ActivationLayeredService = NatsConsumeService<ActivationService>;

/// Durable consumer of thing activation messages.
pub struct ActivationConsumer {
    consumer: TowerConsumer<ActivationLayeredService>,
}

impl ActivationConsumer {
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        settings: ConsumerSettings,
        provisioning: Arc<ProvisioningService>,
    ) -> Result<Self> {
        debug!(
            stream = %settings.stream_name,
            consumer = %settings.consumer_name,
            filter = %settings.filter_subject,
            "initializing activation consumer"
        );

        let service = ServiceBuilder::new()
            .layer(NatsConsumeLayer::new("provision_thing"))
            .service(ActivationService::new(provisioning));

        let consumer = TowerConsumer::new(jetstream, settings, service).await?;
        Ok(Self { consumer })
    }

    pub async fn run(self, ctx: CancellationToken) -> Result<()> {
        debug!("starting activation consumer");
        self.consumer.run(ctx).await
    }
}
