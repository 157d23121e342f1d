mod mqtt_source_runner;
pub(crate) mod subscriber;

pub use mqtt_source_runner::{MqttSourceRunner, MqttSourceSettings};
pub use subscriber::run_mqtt_source;
