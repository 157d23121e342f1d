use crate::domain::result::{DomainResult, ResolutionError};
use crate::domain::thing::{Feature, Thing, ThingId};
use async_trait::async_trait;

/// Access to the digital-twin platform.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TwinClient: Send + Sync {
    async fn retrieve_thing(&self, thing_id: &ThingId) -> Result<Thing, ResolutionError>;

    async fn retrieve_feature(
        &self,
        thing_id: &ThingId,
        feature_id: &str,
    ) -> Result<Feature, ResolutionError>;

    /// Overwrite a single feature property with an already-typed JSON value.
    async fn put_property(
        &self,
        thing_id: &ThingId,
        feature_id: &str,
        property: &str,
        value: serde_json::Value,
    ) -> DomainResult<()>;
}

/// Loads description documents by address.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DescriptionFetcher: Send + Sync {
    async fn fetch_description(&self, url: &str) -> Result<serde_json::Value, ResolutionError>;
}
