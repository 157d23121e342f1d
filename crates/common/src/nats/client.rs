use crate::nats::traits::{JetStreamConsumer, JetStreamPublisher, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream::Config as StreamConfig};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Owned NATS connection with its JetStream context.
///
/// Constructed once by the binary and closed once by its shutdown closer.
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsClient {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        info!(url = %url, timeout_ms = timeout.as_millis(), "connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("connected to NATS");
        Ok(Self { client, jetstream })
    }

    /// Create the stream if missing; it captures every subject below `stream_name`.
    pub async fn ensure_stream(&self, stream_name: &str, description: &str) -> Result<()> {
        if self.jetstream.get_stream(stream_name).await.is_ok() {
            debug!(stream = %stream_name, "stream already exists");
            return Ok(());
        }

        let config = StreamConfig {
            name: stream_name.to_string(),
            subjects: vec![format!("{}.>", stream_name)],
            description: Some(description.to_string()),
            ..Default::default()
        };

        self.jetstream
            .create_stream(config)
            .await
            .with_context(|| format!("failed to create stream {}", stream_name))?;
        info!(stream = %stream_name, "created stream");
        Ok(())
    }

    pub fn create_consumer_client(&self) -> Arc<dyn JetStreamConsumer> {
        Arc::new(NatsJetStreamConsumer::new(self.jetstream.clone()))
    }

    pub fn create_publisher_client(&self) -> Arc<dyn JetStreamPublisher> {
        Arc::new(NatsJetStreamPublisher::new(self.jetstream.clone()))
    }

    /// Flush pending publishes. Other holders of the client keep a usable
    /// connection, which is dropped with the last of them.
    pub async fn close(&self) {
        info!("closing NATS connection");
        if let Err(e) = self.client.flush().await {
            warn!(error = %e, "failed to flush NATS connection on close");
        }
    }
}

pub struct NatsJetStreamConsumer {
    context: jetstream::Context,
}

impl NatsJetStreamConsumer {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamConsumer for NatsJetStreamConsumer {
    async fn create_consumer(
        &self,
        config: jetstream::consumer::pull::Config,
        stream_name: &str,
    ) -> Result<Box<dyn PullConsumer>> {
        let consumer = self
            .context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Box::new(NatsPullConsumer { consumer }))
    }
}

pub struct NatsPullConsumer {
    consumer: jetstream::consumer::PullConsumer,
}

#[async_trait]
impl PullConsumer for NatsPullConsumer {
    async fn fetch_messages(
        &self,
        max_messages: usize,
        expires: Duration,
    ) -> Result<Vec<jetstream::Message>> {
        let mut batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(expires)
            .messages()
            .await
            .context("failed to fetch messages")?;

        let mut messages = Vec::with_capacity(max_messages);
        while let Some(next) = batch.next().await {
            match next {
                Ok(message) => messages.push(message),
                Err(e) => warn!(error = %e, "error receiving message in batch"),
            }
        }
        Ok(messages)
    }
}

pub struct NatsJetStreamPublisher {
    context: jetstream::Context,
}

impl NatsJetStreamPublisher {
    pub fn new(context: jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl JetStreamPublisher for NatsJetStreamPublisher {
    async fn get_stream(&self, stream_name: &str) -> Result<()> {
        self.context
            .get_stream(stream_name)
            .await
            .context("failed to get stream")?;
        Ok(())
    }

    async fn create_stream(&self, config: jetstream::stream::Config) -> Result<()> {
        self.context
            .create_stream(config)
            .await
            .context("failed to create stream")?;
        Ok(())
    }

    #[instrument(skip(self, headers, payload), fields(subject = %subject, payload_size = payload.len()))]
    async fn publish_with_headers(
        &self,
        subject: String,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<()> {
        let ack = self
            .context
            .publish_with_headers(subject, headers, payload)
            .await
            .context("failed to publish message to JetStream")?;

        ack.await
            .context("failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}
