pub mod domain;
pub mod nats;
pub mod telemetry;
pub mod twin;
