use crate::domain::{coerce_value, SchemaCache, SchemaKey};
use common::domain::{
    DataType, DescriptionResolver, DomainResult, MessageMetadata, MetadataValidator,
    RoutedMessage, TwinClient, FEATURE_ID_KEY, NULL_VALUE_KEY, PROPERTY_KEY, THING_ID_KEY,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Routing keys a routed message must carry to be written.
pub const WRITER_REQUIRED_METADATA: &[&str] = &[THING_ID_KEY, FEATURE_ID_KEY, PROPERTY_KEY];

/// Every header the writer reads from a routed message.
pub const WRITER_METADATA_KEYS: &[&str] = &[THING_ID_KEY, FEATURE_ID_KEY, PROPERTY_KEY, NULL_VALUE_KEY];

/// Writes routed values to the twin, typed by the property's declared type.
pub struct TypedPropertyWriter {
    resolver: Arc<DescriptionResolver>,
    twin_client: Arc<dyn TwinClient>,
    cache: Arc<SchemaCache>,
    validator: MetadataValidator,
}

impl TypedPropertyWriter {
    pub fn new(
        resolver: Arc<DescriptionResolver>,
        twin_client: Arc<dyn TwinClient>,
        cache: Arc<SchemaCache>,
    ) -> Self {
        Self {
            resolver,
            twin_client,
            cache,
            validator: MetadataValidator::new(WRITER_REQUIRED_METADATA),
        }
    }

    /// Validate routing metadata and rebuild the routed message.
    pub fn decode(&self, metadata: &MessageMetadata, payload: &[u8]) -> DomainResult<RoutedMessage> {
        self.validator.validate(metadata)?;
        RoutedMessage::from_parts(metadata, payload)
    }

    /// Declared type of the message's property, from the cache or resolved
    /// and cached on first use.
    pub async fn property_type(&self, message: &RoutedMessage) -> DomainResult<DataType> {
        let key = SchemaKey::new(
            message.thing_id.clone(),
            message.feature_id.clone(),
            message.property.clone(),
        );
        if let Some(data_type) = self.cache.get(&key).await {
            return Ok(data_type);
        }

        let resolved = self
            .resolver
            .resolve_property_type(&message.thing_id, &message.feature_id, &message.property)
            .await?;
        let data_type = self.cache.insert_if_absent(key, resolved).await;

        debug!(data_type = %data_type, "cached property type");
        Ok(data_type)
    }

    /// Resolve, coerce and write one property value. Returns the written value.
    #[instrument(
        skip(self, message),
        fields(
            thing_id = %message.thing_id,
            feature_id = %message.feature_id,
            property = %message.property
        )
    )]
    pub async fn write(&self, message: &RoutedMessage) -> DomainResult<Value> {
        let data_type = self.property_type(message).await?;
        let value = coerce_value(data_type, message.raw_value.as_deref())?;

        self.twin_client
            .put_property(
                &message.thing_id,
                &message.feature_id,
                &message.property,
                value.clone(),
            )
            .await?;

        debug!(data_type = %data_type, "property written");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        DomainError, Feature, MockDescriptionFetcher, MockTwinClient, ResolutionError, ThingId,
    };
    use serde_json::json;

    const FEATURE_DESCRIPTION: &str = "http://descriptions.local/feature1.tm.jsonld";

    fn message(raw_value: Option<&str>) -> RoutedMessage {
        RoutedMessage {
            thing_id: "test:test".parse().unwrap(),
            feature_id: "feature1".to_string(),
            property: "myValue".to_string(),
            raw_value: raw_value.map(str::to_string),
        }
    }

    fn feature() -> Feature {
        Feature {
            definition: Some(vec![FEATURE_DESCRIPTION.to_string()]),
            properties: None,
        }
    }

    fn fetcher(declared: &'static str, times: usize) -> MockDescriptionFetcher {
        let mut fetcher = MockDescriptionFetcher::new();
        fetcher
            .expect_fetch_description()
            .times(times)
            .returning(move |_| Ok(json!({ "properties": { "myValue": { "type": declared } } })));
        fetcher
    }

    fn writer(twin: MockTwinClient, fetcher: MockDescriptionFetcher) -> TypedPropertyWriter {
        let twin = Arc::new(twin);
        TypedPropertyWriter::new(
            Arc::new(DescriptionResolver::new(twin.clone(), Arc::new(fetcher))),
            twin,
            Arc::new(SchemaCache::new()),
        )
    }

    #[tokio::test]
    async fn test_writes_coerced_integer() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature()
            .times(1)
            .returning(|_, _| Ok(feature()));
        twin.expect_put_property()
            .withf(|thing_id: &ThingId, feature_id: &str, property: &str, value: &Value| {
                thing_id.to_string() == "test:test"
                    && feature_id == "feature1"
                    && property == "myValue"
                    && *value == json!(42)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let written = writer(twin, fetcher("integer", 1))
            .write(&message(Some("42")))
            .await
            .unwrap();
        assert_eq!(written, json!(42));
    }

    #[tokio::test]
    async fn test_type_is_resolved_once() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature()
            .times(1)
            .returning(|_, _| Ok(feature()));
        twin.expect_put_property()
            .times(3)
            .returning(|_, _, _, _| Ok(()));

        let writer = writer(twin, fetcher("boolean", 1));
        for raw in ["true", "false", "TRUE"] {
            writer.write(&message(Some(raw))).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_parse_failure_skips_twin_write() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature()
            .returning(|_, _| Ok(feature()));
        twin.expect_put_property().times(0);

        let result = writer(twin, fetcher("integer", 1))
            .write(&message(Some("abc")))
            .await;
        assert!(matches!(result, Err(DomainError::Parse(_))));
    }

    #[tokio::test]
    async fn test_resolution_failure_is_reported() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature().returning(|_, _| {
            Err(ResolutionError::unreachable(
                "feature feature1",
                anyhow::anyhow!("connection refused"),
            ))
        });
        twin.expect_put_property().times(0);

        let result = writer(twin, MockDescriptionFetcher::new())
            .write(&message(Some("1")))
            .await;
        match result {
            Err(e) => assert!(e.is_transient()),
            Ok(_) => panic!("expected resolution failure"),
        }
    }

    #[tokio::test]
    async fn test_unknown_type_writes_empty_string() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature()
            .returning(|_, _| Ok(feature()));
        twin.expect_put_property()
            .withf(|_thing_id: &ThingId, _feature_id: &str, _property: &str, value: &Value| {
                *value == json!("")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        writer(twin, fetcher("date-time", 1))
            .write(&message(Some("2024-01-01")))
            .await
            .unwrap();
    }

    #[test]
    fn test_decode_requires_feature_id() {
        let writer = writer(MockTwinClient::new(), MockDescriptionFetcher::new());
        let mut metadata = message(Some("1")).metadata();
        metadata.remove(FEATURE_ID_KEY);

        assert!(matches!(
            writer.decode(&metadata, b"1"),
            Err(DomainError::Validation(_))
        ));
    }
}
