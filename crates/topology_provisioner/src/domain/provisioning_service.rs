use common::domain::{
    sanitize_subject_token, ConnectionEndpoint, DescriptionResolver, DomainError, DomainResult,
    FunctionConfig, MessageMetadata, PipelineName, PipelineOrchestrator, PropertyFeatureMapping,
    SourceConfig, ThingId, MQTT_CATCH_ALL_TOPIC, PROPERTY_FEATURE_MAPPING_KEY, THING_ID_KEY,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ProvisioningConfig {
    pub tenant: String,
    pub namespace: String,
    /// Sources publish to `<raw_subject_prefix>.<source name>`.
    pub raw_subject_prefix: String,
    /// Fan-out functions publish to `<routed_subject_prefix>.<thing>`.
    pub routed_subject_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    pub href: String,
    pub source_name: String,
    pub error: String,
}

/// What one provisioning pass did, per endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisioningReport {
    /// Sources created by this pass.
    pub created: Vec<String>,
    /// Sources that already existed.
    pub skipped: Vec<String>,
    pub failed: Vec<EndpointFailure>,
}

impl ProvisioningReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provisioned {
    Created,
    Existing,
}

/// Turns a thing id into running ingestion sources and fan-out functions,
/// one pair per distinct MQTT endpoint of its description.
pub struct ProvisioningService {
    resolver: Arc<DescriptionResolver>,
    orchestrator: Arc<dyn PipelineOrchestrator>,
    config: ProvisioningConfig,
}

impl ProvisioningService {
    pub fn new(
        resolver: Arc<DescriptionResolver>,
        orchestrator: Arc<dyn PipelineOrchestrator>,
        config: ProvisioningConfig,
    ) -> Self {
        Self {
            resolver,
            orchestrator,
            config,
        }
    }

    /// Provision every thing of the initial set. Failures are logged per thing.
    #[instrument(skip_all, fields(thing_count = thing_ids.len()))]
    pub async fn launch_things(&self, thing_ids: &[ThingId]) {
        info!("provisioning initial things");

        for thing_id in thing_ids {
            match self.provision_thing(thing_id).await {
                Ok(report) if report.is_complete() => {}
                Ok(report) => warn!(
                    thing_id = %thing_id,
                    failed = report.failed.len(),
                    "thing partially provisioned"
                ),
                Err(e) => error!(thing_id = %thing_id, error = %e, "failed to provision thing"),
            }
        }
    }

    /// Resolve the thing and make sure a source and a fan-out function run
    /// for each of its endpoints.
    ///
    /// Only resolution failures are returned as errors. Endpoint failures
    /// are recorded in the report and never stop the remaining endpoints.
    #[instrument(skip(self), fields(thing_id = %thing_id))]
    pub async fn provision_thing(&self, thing_id: &ThingId) -> DomainResult<ProvisioningReport> {
        let resolution = self.resolver.resolve(thing_id).await?;
        let mut report = ProvisioningReport::default();

        if resolution.endpoints.is_empty() {
            warn!("description declares no mqtt endpoints, nothing to provision");
            return Ok(report);
        }

        for endpoint in &resolution.endpoints {
            let name = PipelineName::new(thing_id, endpoint);
            match self
                .provision_endpoint(thing_id, endpoint, &name, &resolution.mapping)
                .await
            {
                Ok(Provisioned::Created) => report.created.push(name.source()),
                Ok(Provisioned::Existing) => report.skipped.push(name.source()),
                Err(e) => {
                    error!(
                        href = %endpoint.href,
                        source = %name.source(),
                        error = %e,
                        "failed to provision endpoint"
                    );
                    report.failed.push(EndpointFailure {
                        href: endpoint.href.clone(),
                        source_name: name.source(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            created = report.created.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "provisioning finished"
        );
        Ok(report)
    }

    async fn provision_endpoint(
        &self,
        thing_id: &ThingId,
        endpoint: &ConnectionEndpoint,
        name: &PipelineName,
        mapping: &PropertyFeatureMapping,
    ) -> DomainResult<Provisioned> {
        let source_name = name.source();
        let raw_subject = format!(
            "{}.{}",
            self.config.raw_subject_prefix,
            sanitize_subject_token(&source_name)
        );

        let provisioned = self
            .ensure_source(thing_id, endpoint, &source_name, &raw_subject, mapping)
            .await?;
        self.ensure_function(thing_id, &name.function(), &raw_subject)
            .await?;

        Ok(provisioned)
    }

    async fn ensure_source(
        &self,
        thing_id: &ThingId,
        endpoint: &ConnectionEndpoint,
        source_name: &str,
        raw_subject: &str,
        mapping: &PropertyFeatureMapping,
    ) -> DomainResult<Provisioned> {
        let existing = self
            .orchestrator
            .list_sources(&self.config.tenant, &self.config.namespace)
            .await?;
        if existing.iter().any(|s| s == source_name) {
            info!(source = %source_name, "source already exists, skipping");
            return Ok(Provisioned::Existing);
        }

        let mut additional_properties = MessageMetadata::new();
        additional_properties.insert(THING_ID_KEY.to_string(), thing_id.to_string());
        additional_properties.insert(PROPERTY_FEATURE_MAPPING_KEY.to_string(), mapping.encode());

        let config = SourceConfig {
            tenant: self.config.tenant.clone(),
            namespace: self.config.namespace.clone(),
            name: source_name.to_string(),
            host: endpoint.host.clone(),
            port: endpoint.port,
            server_path: endpoint.path.clone(),
            topics: vec![MQTT_CATCH_ALL_TOPIC.to_string()],
            use_tls: false,
            use_websocket: false,
            output_topic: raw_subject.to_string(),
            additional_properties,
        };

        match self.orchestrator.create_source(config).await {
            Ok(()) => {
                info!(source = %source_name, host = %endpoint.host, port = endpoint.port, "created source");
                Ok(Provisioned::Created)
            }
            Err(DomainError::PipelineAlreadyExists(_)) => {
                info!(source = %source_name, "source created concurrently, treating as existing");
                Ok(Provisioned::Existing)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_function(
        &self,
        thing_id: &ThingId,
        function_name: &str,
        raw_subject: &str,
    ) -> DomainResult<()> {
        let existing = self
            .orchestrator
            .list_functions(&self.config.tenant, &self.config.namespace)
            .await?;
        if existing.iter().any(|f| f == function_name) {
            debug!(function = %function_name, "fan-out function already exists");
            return Ok(());
        }

        let config = FunctionConfig {
            tenant: self.config.tenant.clone(),
            namespace: self.config.namespace.clone(),
            name: function_name.to_string(),
            input_topic: raw_subject.to_string(),
            output_topic: format!(
                "{}.{}",
                self.config.routed_subject_prefix,
                thing_id.subject_token()
            ),
        };

        match self.orchestrator.create_function(config).await {
            Ok(()) => {
                info!(function = %function_name, "created fan-out function");
                Ok(())
            }
            Err(DomainError::PipelineAlreadyExists(_)) => {
                debug!(function = %function_name, "fan-out function created concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
