use crate::domain::MessageMetadata;
use crate::nats::headers::metadata_from_headers;
use async_nats::HeaderMap;
use bytes::Bytes;

/// A single consumed message, owned so it can move through Tower layers.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
    /// Delivery attempt, starting at 1.
    pub delivered: i64,
}

impl ConsumeRequest {
    pub fn new(subject: impl Into<String>, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject: subject.into(),
            payload,
            headers,
            delivered: 1,
        }
    }

    pub fn with_delivered(mut self, delivered: i64) -> Self {
        self.delivered = delivered;
        self
    }

    pub fn metadata(&self, keys: &[&str]) -> MessageMetadata {
        metadata_from_headers(self.headers.as_ref(), keys)
    }
}

/// Outcome of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Done with the message, including deliberate drops.
    Ack,
    /// Redeliver later, bounded by the consumer's max deliver.
    Nak(Option<String>),
}

impl ConsumeResponse {
    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak(_) => "nak",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Routing metadata; trace context is added on the way out.
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}
