use crate::nats::{ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, AckKind};
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Durable pull consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// Deliveries per message before JetStream gives up on it.
    pub max_deliver: i64,
    /// Messages of one batch handled at the same time.
    pub concurrency: usize,
}

/// Feeds JetStream messages one by one through a Tower service stack and
/// acks or naks each according to the service's response.
pub struct TowerConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    settings: ConsumerSettings,
    service: S,
}

impl<S> TowerConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        settings: ConsumerSettings,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %settings.stream_name,
            consumer = %settings.consumer_name,
            filter_subject = %settings.filter_subject,
            "creating tower nats consumer"
        );

        let config = jetstream::consumer::pull::Config {
            name: Some(settings.consumer_name.clone()),
            durable_name: Some(settings.consumer_name.clone()),
            filter_subject: settings.filter_subject.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: settings.max_deliver,
            ..Default::default()
        };

        let consumer = jetstream
            .create_consumer(config, &settings.stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            settings,
            service,
        })
    }

    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.settings.stream_name,
            consumer = %self.settings.consumer_name,
            "starting tower nats consumer"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        consumer = %self.settings.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(
                            consumer = %self.settings.consumer_name,
                            error = %e,
                            "error processing batch"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        debug!(consumer = %self.settings.consumer_name, "consumer stopped");
        Ok(())
    }

    async fn fetch_and_process_batch(&mut self) -> Result<()> {
        let messages = self
            .consumer
            .fetch_messages(self.settings.batch_size, self.settings.max_wait)
            .await?;

        if messages.is_empty() {
            debug!("no messages in batch");
            return Ok(());
        }

        debug!(message_count = messages.len(), "received message batch");

        let service = self.service.clone();
        futures::stream::iter(messages)
            .for_each_concurrent(self.settings.concurrency.max(1), move |msg| {
                let service = service.clone();
                async move { process_message(service, msg).await }
            })
            .await;

        Ok(())
    }
}

async fn process_message<S>(service: S, msg: jetstream::Message)
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>,
{
    let delivered = msg.info().map(|info| info.delivered).unwrap_or(1);
    let request = ConsumeRequest::new(
        msg.subject.to_string(),
        Bytes::copy_from_slice(&msg.payload),
        msg.headers.clone(),
    )
    .with_delivered(delivered);

    let response = match service.oneshot(request).await {
        Ok(response) => response,
        Err(e) => {
            error!(subject = %msg.subject, error = %e, "service error processing message");
            ConsumeResponse::nak(e.to_string())
        }
    };

    match response {
        ConsumeResponse::Ack => {
            if let Err(e) = msg.ack().await {
                error!(subject = %msg.subject, error = %e, "failed to acknowledge message");
            }
        }
        ConsumeResponse::Nak(reason) => {
            warn!(
                subject = %msg.subject,
                delivered,
                reason = reason.as_deref().unwrap_or("unspecified"),
                "rejecting message for redelivery"
            );
            if let Err(e) = msg.ack_with(AckKind::Nak(None)).await {
                error!(subject = %msg.subject, error = %e, "failed to reject message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::{MockJetStreamConsumer, MockPullConsumer};
    use futures::future::BoxFuture;
    use std::task::{Context, Poll};

    #[derive(Clone)]
    struct AckAllService;

    impl Service<ConsumeRequest> for AckAllService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            Box::pin(async move { Ok(ConsumeResponse::Ack) })
        }
    }

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            stream_name: "thing_routed".to_string(),
            consumer_name: "property-writer".to_string(),
            filter_subject: "thing_routed.>".to_string(),
            batch_size: 10,
            max_wait: Duration::from_secs(5),
            max_deliver: 5,
            concurrency: 4,
        }
    }

    #[tokio::test]
    async fn test_consumer_creation_applies_settings() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .withf(|config: &jetstream::consumer::pull::Config, stream: &str| {
                config.durable_name.as_deref() == Some("property-writer")
                    && config.filter_subject == "thing_routed.>"
                    && config.max_deliver == 5
                    && stream == "thing_routed"
            })
            .times(1)
            .returning(|_, _| Ok(Box::new(MockPullConsumer::new())));

        let result = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAllService).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_consumer_creation_failure() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream not found")));

        let result = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAllService).await;

        let err = result.err().unwrap();
        assert!(err.to_string().contains("failed to create consumer"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_ok() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| {
                let mut pull = MockPullConsumer::new();
                pull.expect_fetch_messages()
                    .withf(|max: &usize, wait: &Duration| *max == 10 && *wait == Duration::from_secs(5))
                    .times(1)
                    .returning(|_, _| Ok(vec![]));
                Ok(Box::new(pull))
            });

        let mut consumer = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAllService)
            .await
            .unwrap();

        assert!(consumer.fetch_and_process_batch().await.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .returning(|_, _| {
                let mut pull = MockPullConsumer::new();
                pull.expect_fetch_messages().returning(|_, _| Ok(vec![]));
                Ok(Box::new(pull))
            });

        let consumer = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAllService)
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(consumer.run(token).await.is_ok());
    }
}
