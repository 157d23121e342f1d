use crate::domain::{InMemoryPipelineRegistry, PipelineKey, PipelineKind};
use async_trait::async_trait;
use common::domain::{
    DomainResult, FunctionConfig, FunctionRunner, PipelineOrchestrator, SourceConfig, SourceRunner,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Runs sources and functions as tokio tasks inside this process.
pub struct InProcessOrchestrator {
    registry: Arc<InMemoryPipelineRegistry>,
    source_runner: Arc<dyn SourceRunner>,
    function_runner: Arc<dyn FunctionRunner>,
    shutdown_token: CancellationToken,
    stop_timeout: Duration,
}

impl InProcessOrchestrator {
    pub fn new(
        registry: Arc<InMemoryPipelineRegistry>,
        source_runner: Arc<dyn SourceRunner>,
        function_runner: Arc<dyn FunctionRunner>,
        shutdown_token: CancellationToken,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            source_runner,
            function_runner,
            shutdown_token,
            stop_timeout,
        }
    }
}

#[async_trait]
impl PipelineOrchestrator for InProcessOrchestrator {
    #[instrument(skip_all, fields(source = %config.name))]
    async fn create_source(&self, config: SourceConfig) -> DomainResult<()> {
        let key = PipelineKey {
            tenant: config.tenant.clone(),
            namespace: config.namespace.clone(),
            kind: PipelineKind::Source,
            name: config.name.clone(),
        };
        let runner = Arc::clone(&self.source_runner);
        let shutdown_token = self.shutdown_token.clone();

        self.registry
            .register(key, move |process_token| {
                tokio::spawn(async move {
                    runner.run(config, process_token, shutdown_token).await;
                })
            })
            .await?;

        info!("started source");
        Ok(())
    }

    async fn list_sources(&self, tenant: &str, namespace: &str) -> DomainResult<Vec<String>> {
        Ok(self
            .registry
            .names(tenant, namespace, PipelineKind::Source)
            .await)
    }

    #[instrument(skip_all, fields(function = %config.name))]
    async fn create_function(&self, config: FunctionConfig) -> DomainResult<()> {
        let key = PipelineKey {
            tenant: config.tenant.clone(),
            namespace: config.namespace.clone(),
            kind: PipelineKind::Function,
            name: config.name.clone(),
        };
        let runner = Arc::clone(&self.function_runner);
        let shutdown_token = self.shutdown_token.clone();

        self.registry
            .register(key, move |process_token| {
                tokio::spawn(async move {
                    runner.run(config, process_token, shutdown_token).await;
                })
            })
            .await?;

        info!("started function");
        Ok(())
    }

    async fn list_functions(&self, tenant: &str, namespace: &str) -> DomainResult<Vec<String>> {
        Ok(self
            .registry
            .names(tenant, namespace, PipelineKind::Function)
            .await)
    }

    #[instrument(skip(self))]
    async fn shutdown(&self) -> DomainResult<()> {
        let pipelines = self.registry.drain().await;
        info!(count = pipelines.len(), "stopping pipelines");

        for (_, handle) in &pipelines {
            handle.cancel();
        }

        for (key, handle) in pipelines {
            match tokio::time::timeout(self.stop_timeout, handle.join_handle).await {
                Ok(Ok(())) => debug!(pipeline = %key, "pipeline stopped gracefully"),
                Ok(Err(e)) => error!(pipeline = %key, error = ?e, "pipeline task panicked"),
                Err(_) => warn!(pipeline = %key, "pipeline did not stop within timeout"),
            }
        }

        Ok(())
    }
}
