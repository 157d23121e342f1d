mod activation_consumer;
mod activation_service;
mod raw_payload_producer;

pub use activation_consumer::*;
pub use activation_service::*;
pub use raw_payload_producer::*;
