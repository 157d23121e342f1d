pub mod domain;
pub mod mqtt;
pub mod nats;
mod topology_provisioner;

pub use topology_provisioner::*;
