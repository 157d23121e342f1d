use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// Stream holding raw device payloads published by ingestion sources
    #[serde(default = "default_nats_raw_stream")]
    pub nats_raw_stream: String,

    /// Stream holding routed per-property messages
    #[serde(default = "default_nats_routed_stream")]
    pub nats_routed_stream: String,

    /// Stream holding thing activation requests
    #[serde(default = "default_nats_activation_stream")]
    pub nats_activation_stream: String,

    #[serde(default = "default_activation_consumer_name")]
    pub activation_consumer_name: String,

    #[serde(default = "default_writer_consumer_name")]
    pub writer_consumer_name: String,

    /// Batch size for consumers
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Deliveries per message before JetStream gives up on it
    #[serde(default = "default_nats_max_deliver")]
    pub nats_max_deliver: i64,

    /// Messages of one batch handled concurrently
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Ditto configuration
    #[serde(default = "default_ditto_endpoint")]
    pub ditto_endpoint: String,

    #[serde(default = "default_ditto_username")]
    pub ditto_username: String,

    #[serde(default = "default_ditto_password")]
    pub ditto_password: String,

    #[serde(default = "default_ditto_timeout_secs")]
    pub ditto_timeout_secs: u64,

    /// Timeout for fetching description documents in seconds
    #[serde(default = "default_description_timeout_secs")]
    pub description_timeout_secs: u64,

    // Provisioning configuration
    /// Things provisioned at startup (comma-separated thing ids)
    #[serde(default)]
    pub thing_ids: String,

    #[serde(default = "default_pipeline_tenant")]
    pub pipeline_tenant: String,

    #[serde(default = "default_pipeline_namespace")]
    pub pipeline_namespace: String,

    // MQTT source configuration
    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    #[serde(default = "default_mqtt_max_retry_attempts")]
    pub mqtt_max_retry_attempts: u32,

    #[serde(default = "default_mqtt_retry_delay_secs")]
    pub mqtt_retry_delay_secs: u64,

    #[serde(default = "default_mqtt_client_id_prefix")]
    pub mqtt_client_id_prefix: String,

    // Lifecycle configuration
    /// Time processes get to finish after shutdown is requested
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_closer_timeout_secs")]
    pub closer_timeout_secs: u64,

    /// Time each provisioned pipeline gets to stop
    #[serde(default = "default_pipeline_stop_timeout_secs")]
    pub pipeline_stop_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

// OpenTelemetry defaults
fn default_otel_enabled() -> bool {
    false
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "thingflow-all-in-one".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_raw_stream() -> String {
    "thing_raw".to_string()
}

fn default_nats_routed_stream() -> String {
    "thing_routed".to_string()
}

fn default_nats_activation_stream() -> String {
    "thing_activations".to_string()
}

fn default_activation_consumer_name() -> String {
    "topology-provisioner".to_string()
}

fn default_writer_consumer_name() -> String {
    "property-writer".to_string()
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_nats_max_deliver() -> i64 {
    5
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// Ditto defaults
fn default_ditto_endpoint() -> String {
    "http://localhost:8080".to_string()
}

fn default_ditto_username() -> String {
    "ditto".to_string()
}

fn default_ditto_password() -> String {
    "ditto".to_string()
}

fn default_ditto_timeout_secs() -> u64 {
    10
}

fn default_description_timeout_secs() -> u64 {
    10
}

// Provisioning defaults
fn default_pipeline_tenant() -> String {
    "public".to_string()
}

fn default_pipeline_namespace() -> String {
    "default".to_string()
}

// MQTT defaults
fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_max_retry_attempts() -> u32 {
    5
}

fn default_mqtt_retry_delay_secs() -> u64 {
    5
}

fn default_mqtt_client_id_prefix() -> String {
    "thingflow".to_string()
}

// Lifecycle defaults
fn default_drain_timeout_secs() -> u64 {
    10
}

fn default_closer_timeout_secs() -> u64 {
    10
}

fn default_pipeline_stop_timeout_secs() -> u64 {
    5
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("THINGFLOW"))
            .build()?
            .try_deserialize()
    }

    /// Startup thing ids, trimmed, blanks skipped.
    pub fn initial_thing_ids(&self) -> Vec<&str> {
        self.thing_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}
