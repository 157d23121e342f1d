use common::domain::{DomainError, DomainResult};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Source,
    Function,
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Function => write!(f, "function"),
        }
    }
}

/// Pipelines are unique per tenant, namespace, kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub tenant: String,
    pub namespace: String,
    pub kind: PipelineKind,
    pub name: String,
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{}/{}",
            self.kind, self.tenant, self.namespace, self.name
        )
    }
}

/// A running pipeline task and the token that stops it.
pub struct PipelineHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.join_handle.is_finished()
    }
}

/// Registry of running pipelines.
///
/// A pipeline whose task has returned on its own is treated as absent: it is
/// not listed and its key can be registered again.
pub struct InMemoryPipelineRegistry {
    pipelines: RwLock<HashMap<PipelineKey, PipelineHandle>>,
}

impl InMemoryPipelineRegistry {
    pub fn new() -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Start and record a pipeline unless the key is taken.
    ///
    /// The existence check, the start and the insert happen under one write
    /// lock, so concurrent callers for the same key start exactly one task.
    pub async fn register<F>(&self, key: PipelineKey, start: F) -> DomainResult<()>
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        let mut pipelines = self.pipelines.write().await;
        match pipelines.get(&key) {
            Some(handle) if handle.is_running() => {
                return Err(DomainError::PipelineAlreadyExists(key.to_string()));
            }
            Some(_) => debug!(pipeline = %key, "replacing stopped pipeline"),
            None => {}
        }

        let cancellation_token = CancellationToken::new();
        let join_handle = start(cancellation_token.clone());
        pipelines.insert(
            key,
            PipelineHandle {
                cancellation_token,
                join_handle,
            },
        );
        Ok(())
    }

    /// Sorted names of one kind of pipeline in a namespace.
    pub async fn names(&self, tenant: &str, namespace: &str, kind: PipelineKind) -> Vec<String> {
        let pipelines = self.pipelines.read().await;
        let mut names: Vec<String> = pipelines
            .iter()
            .filter(|(k, handle)| {
                k.kind == kind && k.tenant == tenant && k.namespace == namespace && handle.is_running()
            })
            .map(|(k, _)| k.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove every pipeline, handing back the handles so the caller can stop them.
    pub async fn drain(&self) -> Vec<(PipelineKey, PipelineHandle)> {
        let mut pipelines = self.pipelines.write().await;
        pipelines.drain().collect()
    }
}

impl Default for InMemoryPipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
