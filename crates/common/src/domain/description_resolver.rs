use crate::domain::data_type::DataType;
use crate::domain::endpoint::ConnectionEndpoint;
use crate::domain::mapping::PropertyFeatureMapping;
use crate::domain::result::ResolutionError;
use crate::domain::thing::{Feature, ThingId};
use crate::domain::twin::{DescriptionFetcher, TwinClient};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Only event forms with this subprotocol are treated as ingestion endpoints.
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

/// Endpoints and routing table discovered for one thing.
#[derive(Debug, Clone, PartialEq)]
pub struct ThingResolution {
    pub thing_id: ThingId,
    /// Distinct endpoints, in order of first appearance in the description.
    pub endpoints: Vec<ConnectionEndpoint>,
    pub mapping: PropertyFeatureMapping,
}

/// Turns a thing's twin and description documents into endpoints, a
/// property→feature mapping and declared property types.
pub struct DescriptionResolver {
    twin_client: Arc<dyn TwinClient>,
    description_fetcher: Arc<dyn DescriptionFetcher>,
}

impl DescriptionResolver {
    pub fn new(
        twin_client: Arc<dyn TwinClient>,
        description_fetcher: Arc<dyn DescriptionFetcher>,
    ) -> Self {
        Self {
            twin_client,
            description_fetcher,
        }
    }

    /// Resolve endpoints and mapping for a thing. There is no partial result.
    #[instrument(skip(self), fields(thing_id = %thing_id))]
    pub async fn resolve(&self, thing_id: &ThingId) -> Result<ThingResolution, ResolutionError> {
        let thing = self.twin_client.retrieve_thing(thing_id).await?;

        let definition = thing
            .definition
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ResolutionError::missing("definition", format!("thing {}", thing_id)))?;

        let description = self
            .description_fetcher
            .fetch_description(definition)
            .await?;
        let endpoints = extract_endpoints(&description, definition)?;

        let features = thing
            .features
            .as_ref()
            .ok_or_else(|| ResolutionError::missing("features", format!("thing {}", thing_id)))?;
        let mapping = build_mapping(thing_id, features)?;

        debug!(
            endpoint_count = endpoints.len(),
            mapped_properties = mapping.len(),
            "resolved thing description"
        );

        Ok(ThingResolution {
            thing_id: thing_id.clone(),
            endpoints,
            mapping,
        })
    }

    /// Look up the declared type of a feature property in the feature's
    /// own description.
    #[instrument(skip(self), fields(thing_id = %thing_id))]
    pub async fn resolve_property_type(
        &self,
        thing_id: &ThingId,
        feature_id: &str,
        property: &str,
    ) -> Result<DataType, ResolutionError> {
        let feature = self
            .twin_client
            .retrieve_feature(thing_id, feature_id)
            .await?;

        let url = feature
            .definition
            .as_ref()
            .and_then(|ids| ids.first())
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ResolutionError::missing(
                    "definition",
                    format!("feature '{}' of thing {}", feature_id, thing_id),
                )
            })?;

        let description = self.description_fetcher.fetch_description(url).await?;

        let properties = required_field(&description, "properties", || {
            format!("description {}", url)
        })?;
        let schema = required_field(properties, property, || {
            format!("properties of description {}", url)
        })?;
        let declared = required_field(schema, "type", || {
            format!("property '{}' of description {}", property, url)
        })?
        .as_str()
        .ok_or_else(|| ResolutionError::InvalidDocument {
            resource: url.clone(),
            reason: format!("type of property '{}' is not a string", property),
        })?;

        match DataType::from_declared(declared) {
            Some(data_type) => Ok(data_type),
            None => {
                warn!(
                    feature_id = %feature_id,
                    property = %property,
                    declared_type = %declared,
                    "unrecognized property type, treating as null"
                );
                Ok(DataType::Null)
            }
        }
    }
}

fn required_field<'a>(
    parent: &'a Value,
    name: &str,
    context: impl FnOnce() -> String,
) -> Result<&'a Value, ResolutionError> {
    match parent.get(name) {
        Some(Value::Null) | None => Err(ResolutionError::missing(name, context())),
        Some(value) => Ok(value),
    }
}

/// Collect distinct MQTT endpoints from the description's event forms.
fn extract_endpoints(
    description: &Value,
    source: &str,
) -> Result<Vec<ConnectionEndpoint>, ResolutionError> {
    let invalid = |reason: String| ResolutionError::InvalidDocument {
        resource: source.to_string(),
        reason,
    };

    let events = required_field(description, "events", || format!("description {}", source))?
        .as_object()
        .ok_or_else(|| invalid("events is not an object".to_string()))?;

    let mut hrefs: Vec<&str> = Vec::new();

    for (event_name, affordance) in events {
        let forms = required_field(affordance, "forms", || {
            format!("event '{}' of description {}", event_name, source)
        })?
        .as_array()
        .ok_or_else(|| invalid(format!("forms of event '{}' is not an array", event_name)))?;

        for (index, form) in forms.iter().enumerate() {
            let context = || format!("form {} of event '{}' in {}", index, event_name, source);

            let subprotocol = required_field(form, "subprotocol", context)?
                .as_str()
                .ok_or_else(|| invalid(format!("subprotocol of {} is not a string", context())))?;

            if !subprotocol.eq_ignore_ascii_case(MQTT_SUBPROTOCOL) {
                continue;
            }

            let href = required_field(form, "href", context)?
                .as_str()
                .ok_or_else(|| invalid(format!("href of {} is not a string", context())))?;

            if !hrefs.contains(&href) {
                hrefs.push(href);
            }
        }
    }

    hrefs
        .into_iter()
        .map(ConnectionEndpoint::from_href)
        .collect()
}

/// Map every declared property key to its feature, first feature wins.
fn build_mapping(
    thing_id: &ThingId,
    features: &BTreeMap<String, Feature>,
) -> Result<PropertyFeatureMapping, ResolutionError> {
    let mut mapping = PropertyFeatureMapping::new();

    for (feature_id, feature) in features {
        let properties = feature.properties.as_ref().ok_or_else(|| {
            ResolutionError::missing(
                "properties",
                format!("feature '{}' of thing {}", feature_id, thing_id),
            )
        })?;

        for property in properties.keys() {
            match mapping.insert(property.as_str(), feature_id.as_str()) {
                Ok(None) => {}
                Ok(Some(kept)) => warn!(
                    thing_id = %thing_id,
                    property = %property,
                    kept_feature = %kept,
                    ignored_feature = %feature_id,
                    "property declared by several features, keeping first"
                ),
                Err(e) => warn!(
                    thing_id = %thing_id,
                    property = %property,
                    feature_id = %feature_id,
                    error = %e,
                    "property cannot be routed, leaving it unmapped"
                ),
            }
        }
    }

    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::thing::Thing;
    use crate::domain::twin::{MockDescriptionFetcher, MockTwinClient};
    use serde_json::json;

    const THING_DESCRIPTION_URL: &str = "http://descriptions.local/test.td.jsonld";
    const FEATURE_DESCRIPTION_URL: &str = "http://descriptions.local/feature1.td.jsonld";

    fn thing_id() -> ThingId {
        "test:test".parse().unwrap()
    }

    fn feature(properties: Value) -> Feature {
        Feature {
            definition: Some(vec![FEATURE_DESCRIPTION_URL.to_string()]),
            properties: properties.as_object().cloned(),
        }
    }

    fn test_thing() -> Thing {
        let mut features = BTreeMap::new();
        features.insert("feature1".to_string(), feature(json!({ "myValue": 0 })));
        features.insert("feature2".to_string(), feature(json!({ "mySecondValue": "" })));
        Thing {
            thing_id: "test:test".to_string(),
            definition: Some(THING_DESCRIPTION_URL.to_string()),
            features: Some(features),
        }
    }

    fn description_with_forms(forms: Value) -> Value {
        json!({
            "title": "test",
            "events": {
                "measurement": { "forms": forms }
            }
        })
    }

    fn resolver(twin: MockTwinClient, fetcher: MockDescriptionFetcher) -> DescriptionResolver {
        DescriptionResolver::new(Arc::new(twin), Arc::new(fetcher))
    }

    fn twin_returning(thing: Thing) -> MockTwinClient {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_thing()
            .withf(|id: &ThingId| id.to_string() == "test:test")
            .times(1)
            .returning(move |_| Ok(thing.clone()));
        twin
    }

    fn fetcher_returning(url: &'static str, document: Value) -> MockDescriptionFetcher {
        let mut fetcher = MockDescriptionFetcher::new();
        fetcher
            .expect_fetch_description()
            .withf(move |u: &str| u == url)
            .times(1)
            .returning(move |_| Ok(document.clone()));
        fetcher
    }

    #[tokio::test]
    async fn test_resolve_collects_mqtt_endpoints_and_mapping() {
        let description = description_with_forms(json!([
            { "href": "mqtt://broker.local:1883", "subprotocol": "mqtt" },
            { "href": "http://broker.local/events", "subprotocol": "longpoll" },
            { "href": "mqtt://backup.local", "subprotocol": "MQTT" }
        ]));

        let resolver = resolver(
            twin_returning(test_thing()),
            fetcher_returning(THING_DESCRIPTION_URL, description),
        );

        let resolution = resolver.resolve(&thing_id()).await.unwrap();

        let hrefs: Vec<&str> = resolution.endpoints.iter().map(|e| e.href.as_str()).collect();
        assert_eq!(hrefs, vec!["mqtt://broker.local:1883", "mqtt://backup.local"]);
        assert_eq!(resolution.endpoints[1].port, 1883);
        assert_eq!(
            resolution.mapping.encode(),
            "mySecondValue=feature2;myValue=feature1;"
        );
    }

    #[tokio::test]
    async fn test_resolve_deduplicates_endpoints_across_events() {
        let description = json!({
            "events": {
                "temperature": { "forms": [{ "href": "mqtt://broker.local", "subprotocol": "mqtt" }] },
                "humidity": { "forms": [{ "href": "mqtt://broker.local", "subprotocol": "mqtt" }] }
            }
        });

        let resolver = resolver(
            twin_returning(test_thing()),
            fetcher_returning(THING_DESCRIPTION_URL, description),
        );

        let resolution = resolver.resolve(&thing_id()).await.unwrap();
        assert_eq!(resolution.endpoints.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_fails_on_missing_subprotocol() {
        let description = description_with_forms(json!([
            { "href": "mqtt://broker.local" }
        ]));

        let resolver = resolver(
            twin_returning(test_thing()),
            fetcher_returning(THING_DESCRIPTION_URL, description),
        );

        let err = resolver.resolve(&thing_id()).await.unwrap_err();
        match err {
            ResolutionError::MissingField { field, .. } => assert_eq!(field, "subprotocol"),
            other => panic!("expected missing subprotocol, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_fails_on_missing_events() {
        let resolver = resolver(
            twin_returning(test_thing()),
            fetcher_returning(THING_DESCRIPTION_URL, json!({ "title": "no events" })),
        );

        let err = resolver.resolve(&thing_id()).await.unwrap_err();
        assert!(matches!(err, ResolutionError::MissingField { ref field, .. } if field == "events"));
    }

    #[tokio::test]
    async fn test_resolve_fails_without_definition_and_skips_fetch() {
        let mut thing = test_thing();
        thing.definition = None;

        let mut fetcher = MockDescriptionFetcher::new();
        fetcher.expect_fetch_description().times(0);

        let resolver = resolver(twin_returning(thing), fetcher);

        let err = resolver.resolve(&thing_id()).await.unwrap_err();
        assert!(matches!(err, ResolutionError::MissingField { ref field, .. } if field == "definition"));
    }

    #[tokio::test]
    async fn test_resolve_fails_on_feature_without_properties() {
        let mut thing = test_thing();
        if let Some(features) = thing.features.as_mut() {
            features.insert(
                "empty".to_string(),
                Feature {
                    definition: None,
                    properties: None,
                },
            );
        }

        let description = description_with_forms(json!([
            { "href": "mqtt://broker.local", "subprotocol": "mqtt" }
        ]));
        let resolver = resolver(
            twin_returning(thing),
            fetcher_returning(THING_DESCRIPTION_URL, description),
        );

        let err = resolver.resolve(&thing_id()).await.unwrap_err();
        assert!(matches!(err, ResolutionError::MissingField { ref field, .. } if field == "properties"));
    }

    #[tokio::test]
    async fn test_resolve_propagates_unreachable_twin() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_thing().times(1).returning(|_| {
            Err(ResolutionError::unreachable(
                "thing test:test",
                anyhow::anyhow!("connection refused"),
            ))
        });

        let resolver = resolver(twin, MockDescriptionFetcher::new());

        let err = resolver.resolve(&thing_id()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_mapping_collision_keeps_first_feature() {
        let mut features = BTreeMap::new();
        features.insert("alpha".to_string(), feature(json!({ "value": 1 })));
        features.insert("beta".to_string(), feature(json!({ "value": 2, "other": 3 })));

        let mapping = build_mapping(&thing_id(), &features).unwrap();
        assert_eq!(mapping.feature_for("value"), Some("alpha"));
        assert_eq!(mapping.feature_for("other"), Some("beta"));
    }

    #[tokio::test]
    async fn test_resolve_property_type() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature()
            .withf(|id: &ThingId, feature: &str| id.to_string() == "test:test" && feature == "feature1")
            .times(1)
            .returning(|_, _| Ok(feature(json!({ "myValue": 0 }))));

        let fetcher = fetcher_returning(
            FEATURE_DESCRIPTION_URL,
            json!({ "properties": { "myValue": { "type": "integer" } } }),
        );

        let resolver = resolver(twin, fetcher);
        let data_type = resolver
            .resolve_property_type(&thing_id(), "feature1", "myValue")
            .await
            .unwrap();
        assert_eq!(data_type, DataType::Integer);
    }

    #[tokio::test]
    async fn test_resolve_property_type_unknown_is_null() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature()
            .returning(|_, _| Ok(feature(json!({}))));

        let fetcher = fetcher_returning(
            FEATURE_DESCRIPTION_URL,
            json!({ "properties": { "stamp": { "type": "date-time" } } }),
        );

        let resolver = resolver(twin, fetcher);
        let data_type = resolver
            .resolve_property_type(&thing_id(), "feature1", "stamp")
            .await
            .unwrap();
        assert_eq!(data_type, DataType::Null);
    }

    #[tokio::test]
    async fn test_resolve_property_type_missing_property() {
        let mut twin = MockTwinClient::new();
        twin.expect_retrieve_feature()
            .returning(|_, _| Ok(feature(json!({}))));

        let fetcher = fetcher_returning(
            FEATURE_DESCRIPTION_URL,
            json!({ "properties": { "other": { "type": "string" } } }),
        );

        let resolver = resolver(twin, fetcher);
        let err = resolver
            .resolve_property_type(&thing_id(), "feature1", "myValue")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::MissingField { ref field, .. } if field == "myValue"));
    }
}
