//! Wiring for each bridge subcommand.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use iotbridge_core::clock::system_clock;
use iotbridge_core::{BatchPipeline, BridgeConfig, MessageHandler, MessageRouter, PointSink, ValueResolver};
use iotbridge_mqtt::{MqttConfig, MqttTransport};
use iotbridge_sinks::cache::{CacheBridge, CacheStore, RedisCacheStore};
use iotbridge_sinks::influx::{InfluxBridge, InfluxConfig, InfluxSink};
use iotbridge_sinks::opcua::{AddressSpace, OpcUaBridge, UserApi};
use tokio::sync::watch;
use tracing::info;

pub const INFLUX_CLIENT_ID: &str = "THINGSROOT_MQTT_TO_INFLUXDB";
pub const CACHE_CLIENT_ID: &str = "THINGSROOT_MQTT_TO_REDIS";
pub const OPCUA_CLIENT_ID: &str = "IOE_MQTT_TO_OPCUA";

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub unique_client_id: bool,
}

fn new_router() -> MessageRouter {
    MessageRouter::new(Arc::new(ValueResolver::new()), system_clock())
}

async fn run_transport(
    config: &BridgeConfig,
    options: RunOptions,
    client_id: &str,
    handler: Arc<dyn MessageHandler>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut mqtt = MqttConfig::from_section(&config.mqtt, client_id);
    if options.unique_client_id {
        mqtt = mqtt.with_unique_suffix();
    }
    MqttTransport::new(mqtt).run(handler, shutdown).await?;
    Ok(())
}

pub async fn run_influx(
    config: &BridgeConfig,
    options: RunOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let sink = InfluxSink::new(InfluxConfig::from_section(&config.influxdb))?;
    sink.ensure_schema()
        .await
        .context("time-series database is unreachable")?;

    let pipeline = BatchPipeline::new(config.pipeline.to_pipeline_config(), Arc::new(sink));
    let handle = pipeline.start();
    let bridge = Arc::new(InfluxBridge::new(new_router(), pipeline));

    let result = run_transport(config, options, INFLUX_CLIENT_ID, bridge, shutdown).await;
    let stats = handle.shutdown().await;
    info!(
        written_points = stats.written_points,
        "Time-series bridge stopped"
    );
    result
}

pub async fn run_cache(
    config: &BridgeConfig,
    options: RunOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let store = RedisCacheStore::connect(&config.redis)
        .await
        .context("cache is unreachable")?;
    let bridge = Arc::new(CacheBridge::new(
        new_router(),
        Arc::new(store),
        Duration::from_secs(config.redis.offline_expire_secs),
    ));

    run_transport(config, options, CACHE_CLIENT_ID, bridge, shutdown).await
}

pub async fn run_opcua(
    config: &BridgeConfig,
    options: RunOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let store: Arc<dyn CacheStore> = Arc::new(
        RedisCacheStore::connect(&config.redis)
            .await
            .context("cache is unreachable")?,
    );
    let api = Arc::new(UserApi::from_section(&config.iot)?);
    let bridge = Arc::new(OpcUaBridge::new(
        new_router(),
        AddressSpace::new(&config.opcua.namespace),
        Some(store),
        api,
    ));
    let loaded = bridge.load_from_cache().await?;
    info!(
        server = %config.opcua.server_name,
        endpoint = %config.opcua.endpoint,
        devices = loaded,
        "Address space ready"
    );

    run_transport(config, options, OPCUA_CLIENT_ID, bridge, shutdown).await
}

pub async fn run_user_app(config: &BridgeConfig, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    iotbridge_api::run(&config.user_app, async move {
        let _ = shutdown.changed().await;
    })
    .await
}
