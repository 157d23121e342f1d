use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, RawPayload, RawPayloadProducer};
use common::nats::{headers_from_metadata, LayeredPublisher, PublishRequest};
use tower::ServiceExt;
use tracing::debug;

/// Publishes raw source payloads to JetStream with their metadata as headers.
pub struct NatsRawPayloadProducer {
    publisher: LayeredPublisher,
}

impl NatsRawPayloadProducer {
    pub fn new(publisher: LayeredPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl RawPayloadProducer for NatsRawPayloadProducer {
    async fn publish(&self, subject: &str, payload: &RawPayload) -> DomainResult<()> {
        let request = PublishRequest::new(subject, payload.payload.clone())
            .with_headers(headers_from_metadata(&payload.metadata));

        self.publisher
            .clone()
            .oneshot(request)
            .await
            .map_err(DomainError::External)?;

        debug!(subject = %subject, size_bytes = payload.payload.len(), "published raw payload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_nats::HeaderMap;
    use bytes::Bytes;
    use common::domain::MessageMetadata;
    use common::nats::{layered_publisher, MockJetStreamPublisher};
    use std::sync::Arc;

    fn raw_payload() -> RawPayload {
        let mut metadata = MessageMetadata::new();
        metadata.insert("thingId".to_string(), "test:test".to_string());
        metadata.insert("propertyFeatureMapping".to_string(), "myValue=feature1;".to_string());
        RawPayload {
            payload: Bytes::from_static(br#"{"myValue":12}"#),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_publish_carries_metadata_headers() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .withf(|subject: &String, headers: &HeaderMap, payload: &Bytes| {
                subject == "thing_raw.source-a"
                    && headers.get("thingId").map(|v| v.as_str()) == Some("test:test")
                    && headers.get("propertyFeatureMapping").map(|v| v.as_str())
                        == Some("myValue=feature1;")
                    && payload.as_ref() == br#"{"myValue":12}"#
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let producer = NatsRawPayloadProducer::new(layered_publisher(Arc::new(mock), "test"));
        let result = producer.publish("thing_raw.source-a", &raw_payload()).await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_failure_is_external_error() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("no responders")));

        let producer = NatsRawPayloadProducer::new(layered_publisher(Arc::new(mock), "test"));
        let result = producer.publish("thing_raw.source-a", &raw_payload()).await;

        assert!(matches!(result, Err(DomainError::External(_))));
    }
}
