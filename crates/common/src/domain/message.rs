use crate::domain::metadata::{
    MessageMetadata, FEATURE_ID_KEY, NULL_VALUE_KEY, PROPERTY_KEY, THING_ID_KEY,
};
use crate::domain::result::{DomainError, DomainResult};
use crate::domain::thing::ThingId;
use async_trait::async_trait;
use bytes::Bytes;

/// Device payload as received by an ingestion source, plus the source's
/// routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub payload: Bytes,
    pub metadata: MessageMetadata,
}

/// One property value addressed to one feature of one thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    pub thing_id: ThingId,
    pub feature_id: String,
    pub property: String,
    /// `None` is the null marker: the device sent JSON `null`.
    pub raw_value: Option<String>,
}

impl RoutedMessage {
    pub fn metadata(&self) -> MessageMetadata {
        let mut metadata = MessageMetadata::new();
        metadata.insert(THING_ID_KEY.to_string(), self.thing_id.to_string());
        metadata.insert(FEATURE_ID_KEY.to_string(), self.feature_id.clone());
        metadata.insert(PROPERTY_KEY.to_string(), self.property.clone());
        if self.raw_value.is_none() {
            metadata.insert(NULL_VALUE_KEY.to_string(), "true".to_string());
        }
        metadata
    }

    pub fn payload(&self) -> Bytes {
        match &self.raw_value {
            Some(value) => Bytes::copy_from_slice(value.as_bytes()),
            None => Bytes::new(),
        }
    }

    /// Rebuild a message from validated metadata and its body.
    pub fn from_parts(metadata: &MessageMetadata, payload: &[u8]) -> DomainResult<Self> {
        let field = |key: &str| {
            metadata
                .get(key)
                .cloned()
                .ok_or_else(|| DomainError::Validation(format!("required metadata '{}' is missing", key)))
        };

        let thing_id: ThingId = field(THING_ID_KEY)?.parse()?;
        let is_null = metadata
            .get(NULL_VALUE_KEY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let raw_value = if is_null {
            None
        } else {
            Some(
                String::from_utf8(payload.to_vec())
                    .map_err(|e| DomainError::Parse(format!("value is not valid UTF-8: {}", e)))?,
            )
        };

        Ok(Self {
            thing_id,
            feature_id: field(FEATURE_ID_KEY)?,
            property: field(PROPERTY_KEY)?,
            raw_value,
        })
    }
}

/// Publishes raw device payloads onto a source's output subject.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RawPayloadProducer: Send + Sync {
    async fn publish(&self, subject: &str, payload: &RawPayload) -> DomainResult<()>;
}

/// Publishes routed per-property messages.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RoutedMessageProducer: Send + Sync {
    async fn publish(&self, subject: &str, message: &RoutedMessage) -> DomainResult<()>;
}
