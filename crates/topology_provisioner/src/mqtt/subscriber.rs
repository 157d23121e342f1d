use crate::mqtt::MqttSourceSettings;
use bytes::Bytes;
use common::domain::{
    DomainError, DomainResult, RawPayload, RawPayloadProducer, SourceConfig, MQTT_TOPIC_KEY,
};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, Transport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

/// Run one MQTT ingestion source until either token is cancelled.
///
/// Subscribes to the source's topic filters and republishes every payload
/// on the source's output subject, tagged with its routing metadata.
#[instrument(
    name = "mqtt_source",
    skip_all,
    fields(source = %config.name, host = %config.host, port = config.port)
)]
pub async fn run_mqtt_source(
    config: SourceConfig,
    settings: MqttSourceSettings,
    process_token: CancellationToken,
    shutdown_token: CancellationToken,
    producer: Arc<dyn RawPayloadProducer>,
) {
    if config.use_websocket {
        error!("websocket transport is not supported, source not started");
        return;
    }

    info!(topics = ?config.topics, "starting MQTT source");

    let mut retries = ConnectionRetries::new(settings.max_retry_attempts);

    loop {
        if process_token.is_cancelled() || shutdown_token.is_cancelled() {
            debug!("MQTT source cancelled before connection");
            break;
        }

        match run_mqtt_connection(
            &config,
            &settings,
            &process_token,
            &shutdown_token,
            Arc::clone(&producer),
            &mut retries,
        )
        .await
        {
            Ok(()) => {
                debug!("MQTT source stopped cleanly");
                break;
            }
            Err(e) => {
                error!(error = %e, "MQTT connection error");

                if !retries.record_failure() {
                    error!(
                        max_retries = settings.max_retry_attempts,
                        "max retry attempts reached, stopping MQTT source"
                    );
                    break;
                }

                warn!(
                    attempt = retries.consecutive_failures(),
                    max_attempts = settings.max_retry_attempts,
                    "retrying MQTT connection"
                );

                tokio::select! {
                    _ = process_token.cancelled() => break,
                    _ = shutdown_token.cancelled() => break,
                    _ = tokio::time::sleep(settings.retry_delay) => {}
                }
            }
        }
    }

    info!("MQTT source stopped");
}

async fn run_mqtt_connection(
    config: &SourceConfig,
    settings: &MqttSourceSettings,
    process_token: &CancellationToken,
    shutdown_token: &CancellationToken,
    producer: Arc<dyn RawPayloadProducer>,
    retries: &mut ConnectionRetries,
) -> DomainResult<()> {
    let client_id = format!("{}-{}", settings.client_id_prefix, config.name);
    let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);
    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_session(true);
    if config.use_tls {
        mqtt_options.set_transport(Transport::tls_with_default_config());
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, settings.channel_capacity);

    for topic in &config.topics {
        client
            .subscribe(topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| DomainError::Provisioning(format!("failed to subscribe to {}: {}", topic, e)))?;
        info!(topic = %topic, "subscribed to MQTT topic");
    }

    loop {
        tokio::select! {
            _ = process_token.cancelled() => {
                debug!("process cancellation received");
                let _ = client.disconnect().await;
                return Ok(());
            }
            _ = shutdown_token.cancelled() => {
                debug!("shutdown signal received");
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_mqtt_message(
                            config,
                            &publish.topic,
                            publish.payload,
                            Arc::clone(&producer),
                        )
                        .await;
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        debug!("subscription acknowledged");
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        retries.record_connected();
                        info!("connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(DomainError::Provisioning(format!(
                            "MQTT event loop error: {}",
                            e
                        )));
                    }
                }
            }
        }
    }
}

/// Reconnect budget. Only consecutive failures count: every accepted
/// connection restores the full budget.
#[derive(Debug)]
pub(crate) struct ConnectionRetries {
    max_attempts: u32,
    consecutive_failures: u32,
}

impl ConnectionRetries {
    pub(crate) fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            consecutive_failures: 0,
        }
    }

    pub(crate) fn record_connected(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failed connection; false once the budget is spent.
    pub(crate) fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        self.consecutive_failures < self.max_attempts
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Forward one MQTT payload. Each message starts its own trace.
pub(crate) async fn handle_mqtt_message(
    config: &SourceConfig,
    topic: &str,
    payload: Bytes,
    producer: Arc<dyn RawPayloadProducer>,
) {
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        source = %config.name,
        topic = %topic,
        payload_size = payload.len(),
    );

    async {
        let mut metadata = config.additional_properties.clone();
        metadata.insert(MQTT_TOPIC_KEY.to_string(), topic.to_string());

        let raw = RawPayload { payload, metadata };

        if let Err(e) = producer.publish(&config.output_topic, &raw).await {
            error!(error = %e, "failed to publish raw payload to NATS");
        } else {
            debug!(subject = %config.output_topic, "published raw payload to NATS");
        }
    }
    .instrument(span)
    .await
}
