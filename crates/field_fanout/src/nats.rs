mod fanout_function_runner;
mod fanout_service;
mod routed_message_producer;

pub use fanout_function_runner::*;
pub use fanout_service::*;
pub use routed_message_producer::*;
