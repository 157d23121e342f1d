use common::domain::{
    DomainError, DomainResult, MessageMetadata, MetadataValidator, PropertyFeatureMapping,
    RoutedMessage, RoutedMessageProducer, ThingId, PROPERTY_FEATURE_MAPPING_KEY, THING_ID_KEY,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Routing keys a raw payload must carry.
pub const FANOUT_REQUIRED_METADATA: &[&str] = &[THING_ID_KEY, PROPERTY_FEATURE_MAPPING_KEY];

/// Result of fanning out one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutOutcome {
    pub published: usize,
    pub failed: usize,
    /// Top-level fields with no feature in the mapping.
    pub unmapped: Vec<String>,
}

/// Splits a JSON object payload into one routed message per top-level field.
pub struct FieldFanoutTransformer {
    producer: Arc<dyn RoutedMessageProducer>,
    validator: MetadataValidator,
}

impl FieldFanoutTransformer {
    pub fn new(producer: Arc<dyn RoutedMessageProducer>) -> Self {
        Self {
            producer,
            validator: MetadataValidator::new(FANOUT_REQUIRED_METADATA),
        }
    }

    /// Build the routed messages for a payload without publishing them.
    ///
    /// Returns the messages in document order and the names of fields the
    /// mapping does not cover.
    pub fn route(
        &self,
        metadata: &MessageMetadata,
        payload: &[u8],
    ) -> DomainResult<(Vec<RoutedMessage>, Vec<String>)> {
        self.validator.validate(metadata)?;

        let field = |key: &str| metadata.get(key).map(String::as_str).unwrap_or_default();
        let thing_id: ThingId = field(THING_ID_KEY).parse()?;
        let mapping: PropertyFeatureMapping = field(PROPERTY_FEATURE_MAPPING_KEY).parse()?;

        let document: Value = serde_json::from_slice(payload)
            .map_err(|e| DomainError::Parse(format!("payload is not JSON: {}", e)))?;
        let fields = match document {
            Value::Object(fields) => fields,
            other => {
                return Err(DomainError::Parse(format!(
                    "payload is a JSON {}, expected an object",
                    json_kind(&other)
                )))
            }
        };

        let mut messages = Vec::with_capacity(fields.len());
        let mut unmapped = Vec::new();

        for (property, value) in fields {
            match mapping.feature_for(&property) {
                Some(feature_id) => messages.push(RoutedMessage {
                    thing_id: thing_id.clone(),
                    feature_id: feature_id.to_string(),
                    property,
                    raw_value: render_value(&value),
                }),
                None => unmapped.push(property),
            }
        }

        Ok((messages, unmapped))
    }

    /// Route a payload and publish every field concurrently to `subject`.
    ///
    /// A failed field publish is logged and counted; it never affects the
    /// other fields.
    #[instrument(skip(self, metadata, payload), fields(thing_id = tracing::field::Empty))]
    pub async fn transform(
        &self,
        subject: &str,
        metadata: &MessageMetadata,
        payload: &[u8],
    ) -> DomainResult<FanoutOutcome> {
        let (messages, unmapped) = self.route(metadata, payload)?;
        if let Some(thing_id) = metadata.get(THING_ID_KEY) {
            tracing::Span::current().record("thing_id", thing_id.as_str());
        }

        for property in &unmapped {
            let e = DomainError::Mapping(format!("no feature mapped for property '{}'", property));
            warn!(property = %property, error = %e, "dropping unmapped field");
        }

        let results = futures::future::join_all(
            messages
                .iter()
                .map(|message| self.producer.publish(subject, message)),
        )
        .await;

        let mut outcome = FanoutOutcome {
            unmapped,
            ..Default::default()
        };
        for (message, result) in messages.iter().zip(results) {
            match result {
                Ok(()) => outcome.published += 1,
                Err(e) => {
                    outcome.failed += 1;
                    error!(
                        feature_id = %message.feature_id,
                        property = %message.property,
                        error = %e,
                        "failed to publish routed field"
                    );
                }
            }
        }

        debug!(
            published = outcome.published,
            failed = outcome.failed,
            unmapped = outcome.unmapped.len(),
            "payload fanned out"
        );
        Ok(outcome)
    }
}

/// Textual form of a field value; `None` is the null marker.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
