use async_trait::async_trait;
use common::domain::{DomainError, DomainResult, RoutedMessage, RoutedMessageProducer};
use common::nats::{headers_from_metadata, LayeredPublisher, PublishRequest};
use tower::ServiceExt;
use tracing::debug;

/// Publishes routed messages with their routing keys as NATS headers and
/// the raw value as the body.
pub struct NatsRoutedMessageProducer {
    publisher: LayeredPublisher,
}

impl NatsRoutedMessageProducer {
    pub fn new(publisher: LayeredPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl RoutedMessageProducer for NatsRoutedMessageProducer {
    async fn publish(&self, subject: &str, message: &RoutedMessage) -> DomainResult<()> {
        let request = PublishRequest::new(subject, message.payload())
            .with_headers(headers_from_metadata(&message.metadata()));

        self.publisher
            .clone()
            .oneshot(request)
            .await
            .map_err(DomainError::External)?;

        debug!(
            subject = %subject,
            feature_id = %message.feature_id,
            property = %message.property,
            "published routed message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_nats::HeaderMap;
    use bytes::Bytes;
    use common::nats::{layered_publisher, MockJetStreamPublisher};
    use std::sync::Arc;

    fn message(raw_value: Option<&str>) -> RoutedMessage {
        RoutedMessage {
            thing_id: "test:test".parse().unwrap(),
            feature_id: "feature1".to_string(),
            property: "myValue".to_string(),
            raw_value: raw_value.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_publish_value_with_routing_headers() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .withf(|subject: &String, headers: &HeaderMap, payload: &Bytes| {
                subject == "thing_routed.test:test"
                    && headers.get("thingId").map(|v| v.as_str()) == Some("test:test")
                    && headers.get("featureId").map(|v| v.as_str()) == Some("feature1")
                    && headers.get("property").map(|v| v.as_str()) == Some("myValue")
                    && headers.get("nullValue").is_none()
                    && payload.as_ref() == b"12"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let producer = NatsRoutedMessageProducer::new(layered_publisher(Arc::new(mock), "test"));
        producer
            .publish("thing_routed.test:test", &message(Some("12")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_null_marker() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .withf(|_subject: &String, headers: &HeaderMap, payload: &Bytes| {
                headers.get("nullValue").map(|v| v.as_str()) == Some("true") && payload.is_empty()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let producer = NatsRoutedMessageProducer::new(layered_publisher(Arc::new(mock), "test"));
        producer
            .publish("thing_routed.test:test", &message(None))
            .await
            .unwrap();
    }
}
