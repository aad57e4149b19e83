//! Configuration Loading Tests
//!
//! Tests loading the bridge configuration from disk:
//! - Full and partial TOML files
//! - Missing explicit files
//! - Validation of pipeline settings
//

use std::io::Write;
use std::time::Duration;

use iotbridge_core::config::BridgeConfig;
use iotbridge_core::Error;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_config(
        r#"
        [mqtt]
        host = "10.0.0.5"
        port = 1884
        user = "bridge"
        keepalive = 30

        [redis]
        url = "redis://cache:6379"
        status_db = 1

        [influxdb]
        host = "tsdb"
        database = "plant"

        [iot]
        url = "http://iot.local"

        [pipeline]
        intake_capacity = 100
        pending_capacity = 10
        flush_interval_ms = 1000

        [user_app]
        port = 9000
        "#,
    );

    let config = BridgeConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.mqtt.host, "10.0.0.5");
    assert_eq!(config.mqtt.port, 1884);
    assert_eq!(config.mqtt.keepalive, 30);
    assert_eq!(config.redis.database_url(config.redis.status_db), "redis://cache:6379/1");
    assert_eq!(config.redis.config_db, 10);
    assert_eq!(config.influxdb.base_url(), "http://tsdb:8086");
    assert_eq!(config.influxdb.database, "plant");
    assert_eq!(config.user_app.port, 9000);

    let pipeline = config.pipeline.to_pipeline_config();
    assert_eq!(pipeline.intake_capacity, 100);
    assert_eq!(pipeline.pending_capacity, 10);
    assert_eq!(pipeline.flush_interval, Duration::from_secs(1));
    assert_eq!(pipeline.write_timeout, Some(Duration::from_secs(10)));
}

#[test]
fn test_empty_file_uses_defaults() {
    let file = write_config("");
    let config = BridgeConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.influxdb.database, "thingsroot");
    assert_eq!(config.opcua.endpoint, "opc.tcp://0.0.0.0:4840/thingsroot/server");
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    let err = BridgeConfig::load(Some(&missing)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_invalid_toml_is_an_error() {
    let file = write_config("[mqtt\nhost = ");
    assert!(matches!(
        BridgeConfig::load(Some(file.path())),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_zero_flush_interval_rejected() {
    let file = write_config("[pipeline]\nflush_interval_ms = 0\n");
    assert!(matches!(
        BridgeConfig::load(Some(file.path())),
        Err(Error::Validation(_))
    ));
}
