use crate::domain::FieldFanoutTransformer;
use crate::nats::FanoutService;
use async_trait::async_trait;
use common::domain::{sanitize_subject_token, FunctionConfig, FunctionRunner};
use common::nats::{ConsumerSettings, JetStreamConsumer, NatsConsumeLayer, TowerConsumer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::{error, info, instrument};

/// Consumer tuning shared by every fan-out function.
#[derive(Debug, Clone)]
pub struct FanoutConsumerSettings {
    /// Stream holding every source's raw payloads.
    pub stream_name: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub max_deliver: i64,
    pub concurrency: usize,
}

/// Runs a fan-out function as a durable consumer on its input subject.
pub struct FanoutFunctionRunner {
    jetstream: Arc<dyn JetStreamConsumer>,
    transformer: Arc<FieldFanoutTransformer>,
    settings: FanoutConsumerSettings,
}

impl FanoutFunctionRunner {
    pub fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        transformer: Arc<FieldFanoutTransformer>,
        settings: FanoutConsumerSettings,
    ) -> Self {
        Self {
            jetstream,
            transformer,
            settings,
        }
    }

    fn consumer_settings(&self, config: &FunctionConfig) -> ConsumerSettings {
        ConsumerSettings {
            stream_name: self.settings.stream_name.clone(),
            consumer_name: sanitize_subject_token(&config.name),
            filter_subject: config.input_topic.clone(),
            batch_size: self.settings.batch_size,
            max_wait: self.settings.max_wait,
            max_deliver: self.settings.max_deliver,
            concurrency: self.settings.concurrency,
        }
    }
}

#[async_trait]
impl FunctionRunner for FanoutFunctionRunner {
    #[instrument(name = "fanout_function", skip_all, fields(function = %config.name))]
    async fn run(
        &self,
        config: FunctionConfig,
        process_token: CancellationToken,
        shutdown_token: CancellationToken,
    ) {
        let service = ServiceBuilder::new()
            .layer(NatsConsumeLayer::new("fanout_fields"))
            .service(FanoutService::new(
                Arc::clone(&self.transformer),
                config.output_topic.clone(),
            ));

        let consumer = match TowerConsumer::new(
            Arc::clone(&self.jetstream),
            self.consumer_settings(&config),
            service,
        )
        .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(error = %e, "failed to start fan-out function");
                return;
            }
        };

        info!(
            input = %config.input_topic,
            output = %config.output_topic,
            "fan-out function started"
        );

        // stop on either the function's own token or global shutdown
        let run_token = process_token.child_token();
        if shutdown_token.is_cancelled() {
            run_token.cancel();
        }
        let watcher = {
            let run_token = run_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown_token.cancelled() => run_token.cancel(),
                    _ = run_token.cancelled() => {}
                }
            })
        };

        if let Err(e) = consumer.run(run_token.clone()).await {
            error!(error = %e, "fan-out function stopped with error");
        }
        run_token.cancel();
        let _ = watcher.await;

        info!("fan-out function stopped");
    }
}
