use crate::domain::{DescriptionFetcher, ResolutionError};
use crate::twin::ditto_client::check_status;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Fetches description documents over plain HTTP(S).
pub struct HttpDescriptionFetcher {
    http: Client,
}

impl HttpDescriptionFetcher {
    pub fn new(request_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build description HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl DescriptionFetcher for HttpDescriptionFetcher {
    #[instrument(skip(self))]
    async fn fetch_description(&self, url: &str) -> Result<serde_json::Value, ResolutionError> {
        let parsed = Url::parse(url).map_err(|e| ResolutionError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let response = self
            .http
            .get(parsed)
            .header(reqwest::header::ACCEPT, "application/json, application/td+json")
            .send()
            .await
            .map_err(|e| ResolutionError::unreachable(url, e.into()))?;

        let response = check_status(response, url).await?;
        let document = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ResolutionError::InvalidDocument {
                resource: url.to_string(),
                reason: e.to_string(),
            })?;

        debug!("description fetched");
        Ok(document)
    }
}
