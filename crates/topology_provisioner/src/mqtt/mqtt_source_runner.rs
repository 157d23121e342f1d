use crate::mqtt::run_mqtt_source;
use async_trait::async_trait;
use common::domain::{RawPayloadProducer, SourceConfig, SourceRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MqttSourceSettings {
    pub keep_alive: Duration,
    /// Consecutive failed connections before the source gives up.
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub client_id_prefix: String,
    pub channel_capacity: usize,
}

impl Default for MqttSourceSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(30),
            max_retry_attempts: 5,
            retry_delay: Duration::from_secs(5),
            client_id_prefix: "thingflow".to_string(),
            channel_capacity: 100,
        }
    }
}

/// Source runner backed by an MQTT subscription.
pub struct MqttSourceRunner {
    producer: Arc<dyn RawPayloadProducer>,
    settings: MqttSourceSettings,
}

impl MqttSourceRunner {
    pub fn new(producer: Arc<dyn RawPayloadProducer>, settings: MqttSourceSettings) -> Self {
        Self { producer, settings }
    }
}

#[async_trait]
impl SourceRunner for MqttSourceRunner {
    async fn run(
        &self,
        config: SourceConfig,
        process_token: CancellationToken,
        shutdown_token: CancellationToken,
    ) {
        run_mqtt_source(
            config,
            self.settings.clone(),
            process_token,
            shutdown_token,
            Arc::clone(&self.producer),
        )
        .await;
    }
}
