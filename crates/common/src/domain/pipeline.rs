use crate::domain::endpoint::ConnectionEndpoint;
use crate::domain::metadata::MessageMetadata;
use crate::domain::result::DomainResult;
use crate::domain::thing::ThingId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

/// Catch-all MQTT topic filter used for provisioned sources.
pub const MQTT_CATCH_ALL_TOPIC: &str = "#";

const NAME_DIGEST_BYTES: usize = 6;

/// Ingestion source definition submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub tenant: String,
    pub namespace: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub server_path: String,
    pub topics: Vec<String>,
    pub use_tls: bool,
    pub use_websocket: bool,
    /// Subject every received payload is published to.
    pub output_topic: String,
    /// Attached verbatim to every payload as routing metadata.
    pub additional_properties: MessageMetadata,
}

/// Processing function wired between two subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionConfig {
    pub tenant: String,
    pub namespace: String,
    pub name: String,
    pub input_topic: String,
    pub output_topic: String,
}

/// Deterministic pipeline naming for a (thing, endpoint) pair.
///
/// The raw thing id and the endpoint href are folded in through a short
/// digest. A thing exposing several brokers gets one pipeline per broker, and
/// ids that only differ in characters the subject token rewrites
/// (`a.b:c` and `a_b:c`) still get distinct names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineName {
    base: String,
}

impl PipelineName {
    pub fn new(thing_id: &ThingId, endpoint: &ConnectionEndpoint) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(thing_id.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(endpoint.href.as_bytes());
        let short: String = hasher
            .finalize()
            .iter()
            .take(NAME_DIGEST_BYTES)
            .map(|b| format!("{:02x}", b))
            .collect();

        Self {
            base: format!("mqtt-{}-{}", thing_id.subject_token(), short),
        }
    }

    pub fn source(&self) -> String {
        format!("{}-source", self.base)
    }

    pub fn function(&self) -> String {
        format!("{}-fanout", self.base)
    }
}

/// Management API of the streaming platform that runs pipelines.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PipelineOrchestrator: Send + Sync {
    /// Fails with `DomainError::PipelineAlreadyExists` if the name is taken.
    async fn create_source(&self, config: SourceConfig) -> DomainResult<()>;

    async fn list_sources(&self, tenant: &str, namespace: &str) -> DomainResult<Vec<String>>;

    /// Fails with `DomainError::PipelineAlreadyExists` if the name is taken.
    async fn create_function(&self, config: FunctionConfig) -> DomainResult<()>;

    async fn list_functions(&self, tenant: &str, namespace: &str) -> DomainResult<Vec<String>>;

    /// Stop every pipeline this orchestrator started.
    async fn shutdown(&self) -> DomainResult<()>;
}

/// Runs one ingestion source until either token is cancelled.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SourceRunner: Send + Sync {
    async fn run(
        &self,
        config: SourceConfig,
        process_token: CancellationToken,
        shutdown_token: CancellationToken,
    );
}

/// Runs one processing function until either token is cancelled.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FunctionRunner: Send + Sync {
    async fn run(
        &self,
        config: FunctionConfig,
        process_token: CancellationToken,
        shutdown_token: CancellationToken,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_name_is_deterministic() {
        let thing: ThingId = "test:test".parse().unwrap();
        let endpoint = ConnectionEndpoint::from_href("mqtt://broker.local:1883").unwrap();

        let first = PipelineName::new(&thing, &endpoint);
        let second = PipelineName::new(&thing, &endpoint);
        assert_eq!(first, second);

        let source = first.source();
        assert!(source.starts_with("mqtt-test:test-"));
        assert!(source.ends_with("-source"));
        // mqtt- + thing + - + 12 hex + -source
        assert_eq!(source.len(), "mqtt-test:test-".len() + 12 + "-source".len());
    }

    #[test]
    fn test_pipeline_name_differs_per_endpoint() {
        let thing: ThingId = "test:test".parse().unwrap();
        let a = ConnectionEndpoint::from_href("mqtt://broker-a.local:1883").unwrap();
        let b = ConnectionEndpoint::from_href("mqtt://broker-b.local:1883").unwrap();

        assert_ne!(
            PipelineName::new(&thing, &a).source(),
            PipelineName::new(&thing, &b).source()
        );
    }

    #[test]
    fn test_pipeline_name_differs_for_ids_sharing_a_subject_token() {
        let dotted: ThingId = "a.b:c".parse().unwrap();
        let underscored: ThingId = "a_b:c".parse().unwrap();
        assert_eq!(dotted.subject_token(), underscored.subject_token());

        let endpoint = ConnectionEndpoint::from_href("mqtt://broker.local").unwrap();
        assert_ne!(
            PipelineName::new(&dotted, &endpoint).source(),
            PipelineName::new(&underscored, &endpoint).source()
        );
    }

    #[test]
    fn test_function_name_shares_base() {
        let thing: ThingId = "org.example:pump".parse().unwrap();
        let endpoint = ConnectionEndpoint::from_href("mqtt://broker.local").unwrap();
        let name = PipelineName::new(&thing, &endpoint);

        let source = name.source();
        let function = name.function();
        assert_eq!(
            source.trim_end_matches("-source"),
            function.trim_end_matches("-fanout")
        );
        assert!(function.starts_with("mqtt-org_example:pump-"));
    }
}
