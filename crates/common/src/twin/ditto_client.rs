use crate::domain::{
    DomainError, DomainResult, Feature, ResolutionError, Thing, ThingId, TwinClient,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Clone)]
pub struct DittoClientConfig {
    /// Base URL of the Ditto HTTP API, e.g. `http://ditto:8080`.
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub request_timeout: Duration,
}

/// Twin client speaking the Eclipse Ditto HTTP API v2 with basic auth.
pub struct DittoHttpClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl DittoHttpClient {
    pub fn new(config: DittoClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.endpoint)
            .with_context(|| format!("invalid Ditto endpoint {}", config.endpoint))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Ditto endpoint {} cannot be a base URL", config.endpoint));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Ditto HTTP client")?;

        Ok(Self {
            http,
            base_url,
            username: config.username,
            password: config.password,
        })
    }

    /// Build the client and verify the credentials against `/api/2/whoami`.
    pub async fn connect(config: DittoClientConfig) -> anyhow::Result<Self> {
        info!(endpoint = %config.endpoint, "connecting to Ditto");
        let client = Self::new(config)?;

        let url = client.api_url(&["whoami"])?;
        client
            .http
            .get(url)
            .basic_auth(&client.username, Some(&client.password))
            .send()
            .await
            .context("Ditto unreachable")?
            .error_for_status()
            .context("Ditto rejected connection check")?;

        info!("connected to Ditto");
        Ok(client)
    }

    /// Pooled HTTP connections are released when the last handle drops.
    pub async fn close(&self) {
        info!("closing Ditto client");
    }

    fn api_url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Ditto endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(["api", "2"])
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        resource: &str,
    ) -> Result<T, ResolutionError> {
        let url = self
            .api_url(segments)
            .map_err(|e| ResolutionError::unreachable(resource, e))?;

        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| ResolutionError::unreachable(resource, e.into()))?;

        let response = check_status(response, resource).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ResolutionError::InvalidDocument {
                resource: resource.to_string(),
                reason: e.to_string(),
            })
    }
}

/// 5xx, 408 and 429 are worth retrying; any other failure status is final.
pub(crate) async fn check_status(
    response: Response,
    resource: &str,
) -> Result<Response, ResolutionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if is_retryable(status) {
        Err(ResolutionError::unreachable(
            resource,
            anyhow!("HTTP {}: {}", status.as_u16(), body),
        ))
    } else {
        Err(ResolutionError::InvalidDocument {
            resource: resource.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), body),
        })
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl TwinClient for DittoHttpClient {
    #[instrument(skip(self), fields(thing_id = %thing_id))]
    async fn retrieve_thing(&self, thing_id: &ThingId) -> Result<Thing, ResolutionError> {
        let id = thing_id.to_string();
        self.get_json(&["things", &id], &format!("thing {}", id))
            .await
    }

    #[instrument(skip(self), fields(thing_id = %thing_id))]
    async fn retrieve_feature(
        &self,
        thing_id: &ThingId,
        feature_id: &str,
    ) -> Result<Feature, ResolutionError> {
        let id = thing_id.to_string();
        self.get_json(
            &["things", &id, "features", feature_id],
            &format!("feature '{}' of thing {}", feature_id, id),
        )
        .await
    }

    #[instrument(skip(self, value), fields(thing_id = %thing_id))]
    async fn put_property(
        &self,
        thing_id: &ThingId,
        feature_id: &str,
        property: &str,
        value: serde_json::Value,
    ) -> DomainResult<()> {
        let id = thing_id.to_string();
        let url = self.api_url(&["things", &id, "features", feature_id, "properties", property])?;

        let response = self
            .http
            .put(url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&value)
            .send()
            .await
            .map_err(|e| DomainError::TwinWrite(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::TwinWrite(format!(
                "HTTP {} writing {}/{}: {}",
                status.as_u16(),
                feature_id,
                property,
                body
            )));
        }

        debug!(feature_id = %feature_id, property = %property, "property written");
        Ok(())
    }
}
