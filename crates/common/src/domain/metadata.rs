use crate::domain::result::{DomainError, DomainResult};
use std::collections::BTreeMap;

pub const THING_ID_KEY: &str = "thingId";
pub const FEATURE_ID_KEY: &str = "featureId";
pub const PROPERTY_KEY: &str = "property";
pub const PROPERTY_FEATURE_MAPPING_KEY: &str = "propertyFeatureMapping";
/// Present with value `true` when a routed message carries the null marker.
pub const NULL_VALUE_KEY: &str = "nullValue";
pub const MQTT_TOPIC_KEY: &str = "mqttTopic";

/// Routing metadata attached to a message, keyed by exact-case names.
pub type MessageMetadata = BTreeMap<String, String>;

/// Intake check shared by every stage that consumes routed metadata.
#[derive(Debug, Clone)]
pub struct MetadataValidator {
    required: Vec<&'static str>,
}

impl MetadataValidator {
    pub fn new(required: &[&'static str]) -> Self {
        Self {
            required: required.to_vec(),
        }
    }

    /// Fails on the first required key that is absent or blank.
    pub fn validate(&self, metadata: &MessageMetadata) -> DomainResult<()> {
        for key in &self.required {
            match metadata.get(*key) {
                Some(value) if !value.trim().is_empty() => {}
                _ => {
                    return Err(DomainError::Validation(format!(
                        "required metadata '{}' is missing",
                        key
                    )))
                }
            }
        }
        Ok(())
    }
}
