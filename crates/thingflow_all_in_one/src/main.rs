mod config;

use common::domain::{DescriptionResolver, PipelineOrchestrator, ThingId, TwinClient};
use common::nats::{layered_publisher, ConsumerSettings, NatsClient};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use common::twin::{DittoClientConfig, DittoHttpClient, HttpDescriptionFetcher};
use config::ServiceConfig;
use field_fanout::domain::FieldFanoutTransformer;
use field_fanout::nats::{FanoutConsumerSettings, FanoutFunctionRunner, NatsRoutedMessageProducer};
use property_writer::domain::{SchemaCache, TypedPropertyWriter};
use property_writer::PropertyWriter;
use std::sync::Arc;
use std::time::Duration;
use thingflow_runner::Runner;
use tokio_util::sync::CancellationToken;
use topology_provisioner::domain::{
    InMemoryPipelineRegistry, InProcessOrchestrator, ProvisioningConfig, ProvisioningService,
};
use topology_provisioner::mqtt::{MqttSourceRunner, MqttSourceSettings};
use topology_provisioner::nats::NatsRawPayloadProducer;
use topology_provisioner::TopologyProvisioner;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting thingflow-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let (nats_client, ditto_client) = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };

    let description_fetcher = match HttpDescriptionFetcher::new(Duration::from_secs(
        config.description_timeout_secs,
    )) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            error!("Failed to initialize description fetcher: {:#}", e);
            std::process::exit(1);
        }
    };

    let twin_client: Arc<dyn TwinClient> = ditto_client.clone();
    let resolver = Arc::new(DescriptionResolver::new(
        Arc::clone(&twin_client),
        description_fetcher,
    ));

    // Pipelines: MQTT sources publish raw payloads, fan-out functions split them
    let raw_producer = Arc::new(NatsRawPayloadProducer::new(layered_publisher(
        nats_client.create_publisher_client(),
        "mqtt_source",
    )));
    let source_runner = Arc::new(MqttSourceRunner::new(
        raw_producer,
        MqttSourceSettings {
            keep_alive: Duration::from_secs(config.mqtt_keep_alive_secs),
            max_retry_attempts: config.mqtt_max_retry_attempts,
            retry_delay: Duration::from_secs(config.mqtt_retry_delay_secs),
            client_id_prefix: config.mqtt_client_id_prefix.clone(),
            ..Default::default()
        },
    ));

    let routed_producer = Arc::new(NatsRoutedMessageProducer::new(layered_publisher(
        nats_client.create_publisher_client(),
        "field_fanout",
    )));
    let function_runner = Arc::new(FanoutFunctionRunner::new(
        nats_client.create_consumer_client(),
        Arc::new(FieldFanoutTransformer::new(routed_producer)),
        FanoutConsumerSettings {
            stream_name: config.nats_raw_stream.clone(),
            batch_size: config.nats_batch_size,
            max_wait: Duration::from_secs(config.nats_batch_wait_secs),
            max_deliver: config.nats_max_deliver,
            concurrency: config.worker_concurrency,
        },
    ));

    // Orchestrator shutdown token, owned by main for lifecycle coordination
    let orchestrator_shutdown_token = CancellationToken::new();
    let orchestrator = Arc::new(InProcessOrchestrator::new(
        Arc::new(InMemoryPipelineRegistry::new()),
        source_runner,
        function_runner,
        orchestrator_shutdown_token.clone(),
        Duration::from_secs(config.pipeline_stop_timeout_secs),
    ));

    let provisioning = Arc::new(ProvisioningService::new(
        Arc::clone(&resolver),
        orchestrator.clone(),
        ProvisioningConfig {
            tenant: config.pipeline_tenant.clone(),
            namespace: config.pipeline_namespace.clone(),
            raw_subject_prefix: config.nats_raw_stream.clone(),
            routed_subject_prefix: config.nats_routed_stream.clone(),
        },
    ));

    let topology_provisioner = match TopologyProvisioner::new(
        provisioning,
        nats_client.create_consumer_client(),
        consumer_settings(
            &config,
            &config.nats_activation_stream,
            &config.activation_consumer_name,
        ),
        parse_thing_ids(&config),
    )
    .await
    {
        Ok(provisioner) => provisioner,
        Err(e) => {
            error!("Failed to initialize topology provisioner: {:#}", e);
            std::process::exit(1);
        }
    };

    let property_writer = match PropertyWriter::new(
        Arc::new(TypedPropertyWriter::new(
            resolver,
            twin_client,
            Arc::new(SchemaCache::new()),
        )),
        nats_client.create_consumer_client(),
        consumer_settings(
            &config,
            &config.nats_routed_stream,
            &config.writer_consumer_name,
        ),
    )
    .await
    {
        Ok(writer) => writer,
        Err(e) => {
            error!("Failed to initialize property writer: {:#}", e);
            std::process::exit(1);
        }
    };

    let runner = Runner::new()
        .with_named_process(
            "topology_provisioner",
            topology_provisioner.into_runner_process(),
        )
        .with_named_process("property_writer", property_writer.into_runner_process())
        .with_closer(move || {
            Box::pin(async move {
                info!("Running cleanup tasks...");
                if let Err(e) = orchestrator.shutdown().await {
                    warn!(error = %e, "failed to stop pipelines cleanly");
                }
                orchestrator_shutdown_token.cancel();
                drop(orchestrator);

                ditto_client.close().await;
                nats_client.close().await;

                // Flush pending traces and logs
                shutdown_telemetry(telemetry_providers);

                info!("Cleanup complete");
                Ok(())
            })
        })
        .with_drain_timeout(Duration::from_secs(config.drain_timeout_secs))
        .with_closer_timeout(Duration::from_secs(config.closer_timeout_secs));

    let exit_code = runner.run().await;
    std::process::exit(exit_code);
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<NatsClient>, Arc<DittoHttpClient>)> {
    info!("Initializing NATS...");
    let nats_client = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.startup_timeout_secs),
        )
        .await?,
    );
    ensure_nats_streams(&nats_client, config).await?;

    info!("Initializing Ditto client...");
    let ditto_client = Arc::new(
        DittoHttpClient::connect(DittoClientConfig {
            endpoint: config.ditto_endpoint.clone(),
            username: config.ditto_username.clone(),
            password: config.ditto_password.clone(),
            request_timeout: Duration::from_secs(config.ditto_timeout_secs),
        })
        .await?,
    );

    Ok((nats_client, ditto_client))
}

async fn ensure_nats_streams(client: &NatsClient, config: &ServiceConfig) -> anyhow::Result<()> {
    client
        .ensure_stream(&config.nats_raw_stream, "raw device payloads")
        .await?;
    client
        .ensure_stream(&config.nats_routed_stream, "routed property values")
        .await?;
    client
        .ensure_stream(&config.nats_activation_stream, "thing activations")
        .await?;
    Ok(())
}

fn consumer_settings(config: &ServiceConfig, stream: &str, consumer: &str) -> ConsumerSettings {
    ConsumerSettings {
        stream_name: stream.to_string(),
        consumer_name: consumer.to_string(),
        filter_subject: format!("{}.>", stream),
        batch_size: config.nats_batch_size,
        max_wait: Duration::from_secs(config.nats_batch_wait_secs),
        max_deliver: config.nats_max_deliver,
        concurrency: config.worker_concurrency,
    }
}

fn parse_thing_ids(config: &ServiceConfig) -> Vec<ThingId> {
    config
        .initial_thing_ids()
        .into_iter()
        .filter_map(|id| match id.parse() {
            Ok(thing_id) => Some(thing_id),
            Err(e) => {
                warn!(thing_id = %id, error = %e, "skipping invalid startup thing id");
                None
            }
        })
        .collect()
}
