mod in_memory_pipeline_registry;
mod in_process_orchestrator;
mod provisioning_service;

pub use in_memory_pipeline_registry::*;
pub use in_process_orchestrator::*;
pub use provisioning_service::*;
