use crate::domain::ProvisioningService;
use crate::nats::ActivationConsumer;
use common::domain::ThingId;
use common::nats::{ConsumerSettings, JetStreamConsumer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Standing provisioning process: provisions the initial things on start,
/// then every thing named by an activation message.
pub struct TopologyProvisioner {
    provisioning: Arc<ProvisioningService>,
    activation_consumer: ActivationConsumer,
    initial_things: Vec<ThingId>,
}

impl TopologyProvisioner {
    pub async fn new(
        provisioning: Arc<ProvisioningService>,
        jetstream: Arc<dyn JetStreamConsumer>,
        activation_settings: ConsumerSettings,
        initial_things: Vec<ThingId>,
    ) -> anyhow::Result<Self> {
        debug!(
            initial_things = initial_things.len(),
            "initializing topology provisioner"
        );

        let activation_consumer =
            ActivationConsumer::new(jetstream, activation_settings, Arc::clone(&provisioning))
                .await?;

        Ok(Self {
            provisioning,
            activation_consumer,
            initial_things,
        })
    }

    #[allow(clippy::type_complexity)]
    pub fn into_runner_process(
        self,
    ) -> Box<
        dyn FnOnce(
                CancellationToken,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
            > + Send,
    > {
        Box::new(move |ctx| {
            Box::pin(async move {
                tokio::select! {
                    _ = ctx.cancelled() => return Ok(()),
                    _ = self.provisioning.launch_things(&self.initial_things) => {}
                }
                self.activation_consumer.run(ctx).await
            })
        })
    }
}
