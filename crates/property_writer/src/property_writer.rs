use crate::domain::TypedPropertyWriter;
use crate::nats::PropertyWriteService;
use common::nats::{
    ConsumerSettings, JetStreamConsumer, NatsConsumeLayer, NatsConsumeService, TowerConsumer,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

type PropertyWriteLayeredService = NatsConsumeService<PropertyWriteService>;

/// Standing writer process: consumes routed messages and writes them to
/// the twin.
pub struct PropertyWriter {
    consumer: TowerConsumer<PropertyWriteLayeredService>,
}

impl PropertyWriter {
    pub async fn new(
        writer: Arc<TypedPropertyWriter>,
        jetstream: Arc<dyn JetStreamConsumer>,
        settings: ConsumerSettings,
    ) -> anyhow::Result<Self> {
        info!(
            stream = %settings.stream_name,
            consumer = %settings.consumer_name,
            filter = %settings.filter_subject,
            "initializing property writer"
        );

        let service = ServiceBuilder::new()
            .layer(NatsConsumeLayer::new("write_property"))
            .service(PropertyWriteService::new(writer));

        let consumer = TowerConsumer::new(jetstream, settings, service).await?;
        Ok(Self { consumer })
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
        let consumer = self.consumer;
        Box::new(move |ctx| Box::pin(async move { consumer.run(ctx).await }))
    }
}
