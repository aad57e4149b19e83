//! Bridge configuration.
//!
//! Sources, in priority order:
//! 1. environment variables (secrets only, see [`env_vars`])
//! 2. TOML file (`--config`, `IOTBRIDGE_CONFIG`, or `./config.toml`)
//! 3. built-in defaults
//!
//! Every field has a default, so a partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::pipeline::PipelineConfig;

/// Default file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Built-in defaults.
pub mod defaults {
    pub const MQTT_HOST: &str = "127.0.0.1";
    pub const MQTT_PORT: u16 = 1883;
    pub const MQTT_USER: &str = "root";
    pub const MQTT_PASSWORD: &str = "root";
    pub const MQTT_KEEPALIVE_SECS: u64 = 60;

    pub const REDIS_URL: &str = "redis://127.0.0.1:6379";
    pub const REDIS_STATUS_DB: u32 = 9;
    pub const REDIS_CONFIG_DB: u32 = 10;
    pub const REDIS_RELATION_DB: u32 = 11;
    pub const REDIS_REALTIME_DB: u32 = 12;
    /// Keys of an offline device expire after 7 days.
    pub const REDIS_OFFLINE_EXPIRE_SECS: u64 = 3600 * 24 * 7;

    pub const INFLUXDB_HOST: &str = "127.0.0.1";
    pub const INFLUXDB_PORT: u16 = 8086;
    pub const INFLUXDB_USER: &str = "root";
    pub const INFLUXDB_PASSWORD: &str = "root";
    pub const INFLUXDB_DATABASE: &str = "thingsroot";
    pub const INFLUXDB_TIMEOUT_MS: u64 = 10_000;

    pub const IOT_URL: &str = "http://127.0.0.1:8000";
    pub const IOT_AUTH_CODE: &str = "UNKNOWN_AUTH_CODE";

    pub const PIPELINE_INTAKE_CAPACITY: usize = crate::pipeline::DEFAULT_INTAKE_CAPACITY;
    pub const PIPELINE_PENDING_CAPACITY: usize = crate::pipeline::DEFAULT_PENDING_CAPACITY;
    pub const PIPELINE_FLUSH_INTERVAL_MS: u64 = 500;
    pub const PIPELINE_WRITE_TIMEOUT_MS: u64 = 10_000;

    pub const OPCUA_ENDPOINT: &str = "opc.tcp://0.0.0.0:4840/thingsroot/server";
    pub const OPCUA_SERVER_NAME: &str = "ThingsRoot Example OpcUA Server";
    pub const OPCUA_NAMESPACE: &str = "http://opcua.thingsroot.com";

    pub const USER_APP_HOST: &str = "0.0.0.0";
    pub const USER_APP_PORT: u16 = 8828;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG_PATH: &str = "IOTBRIDGE_CONFIG";
    pub const MQTT_PASSWORD: &str = "IOTBRIDGE_MQTT_PASSWORD";
    pub const INFLUXDB_PASSWORD: &str = "IOTBRIDGE_INFLUXDB_PASSWORD";
    pub const IOT_AUTH_CODE: &str = "IOTBRIDGE_IOT_AUTH_CODE";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub keepalive: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: defaults::MQTT_HOST.to_string(),
            port: defaults::MQTT_PORT,
            user: defaults::MQTT_USER.to_string(),
            password: defaults::MQTT_PASSWORD.to_string(),
            keepalive: defaults::MQTT_KEEPALIVE_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSection {
    pub url: String,
    pub status_db: u32,
    pub config_db: u32,
    pub relation_db: u32,
    pub realtime_db: u32,
    pub offline_expire_secs: u64,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            url: defaults::REDIS_URL.to_string(),
            status_db: defaults::REDIS_STATUS_DB,
            config_db: defaults::REDIS_CONFIG_DB,
            relation_db: defaults::REDIS_RELATION_DB,
            realtime_db: defaults::REDIS_REALTIME_DB,
            offline_expire_secs: defaults::REDIS_OFFLINE_EXPIRE_SECS,
        }
    }
}

impl RedisSection {
    /// Connection URL for one logical database.
    pub fn database_url(&self, db: u32) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), db)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxSection {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub timeout_ms: u64,
}

impl Default for InfluxSection {
    fn default() -> Self {
        Self {
            host: defaults::INFLUXDB_HOST.to_string(),
            port: defaults::INFLUXDB_PORT,
            username: defaults::INFLUXDB_USER.to_string(),
            password: defaults::INFLUXDB_PASSWORD.to_string(),
            database: defaults::INFLUXDB_DATABASE.to_string(),
            timeout_ms: defaults::INFLUXDB_TIMEOUT_MS,
        }
    }
}

impl InfluxSection {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IotSection {
    pub url: String,
    pub auth_code: String,
}

impl Default for IotSection {
    fn default() -> Self {
        Self {
            url: defaults::IOT_URL.to_string(),
            auth_code: defaults::IOT_AUTH_CODE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub intake_capacity: usize,
    pub pending_capacity: usize,
    pub flush_interval_ms: u64,
    /// `0` disables the write timeout.
    pub write_timeout_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            intake_capacity: defaults::PIPELINE_INTAKE_CAPACITY,
            pending_capacity: defaults::PIPELINE_PENDING_CAPACITY,
            flush_interval_ms: defaults::PIPELINE_FLUSH_INTERVAL_MS,
            write_timeout_ms: defaults::PIPELINE_WRITE_TIMEOUT_MS,
        }
    }
}

impl PipelineSection {
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            intake_capacity: self.intake_capacity,
            pending_capacity: self.pending_capacity,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            write_timeout: (self.write_timeout_ms > 0)
                .then(|| Duration::from_millis(self.write_timeout_ms)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpcUaSection {
    pub endpoint: String,
    pub server_name: String,
    pub namespace: String,
}

impl Default for OpcUaSection {
    fn default() -> Self {
        Self {
            endpoint: defaults::OPCUA_ENDPOINT.to_string(),
            server_name: defaults::OPCUA_SERVER_NAME.to_string(),
            namespace: defaults::OPCUA_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAppSection {
    pub host: String,
    pub port: u16,
}

impl Default for UserAppSection {
    fn default() -> Self {
        Self {
            host: defaults::USER_APP_HOST.to_string(),
            port: defaults::USER_APP_PORT,
        }
    }
}

/// Full configuration shared by every bridge binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttSection,
    pub redis: RedisSection,
    pub influxdb: InfluxSection,
    pub iot: IotSection,
    pub pipeline: PipelineSection,
    pub opcua: OpcUaSection,
    pub user_app: UserAppSection,
}

impl BridgeConfig {
    /// Parse TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration, apply environment overrides and validate.
    ///
    /// An explicit path (argument or `IOTBRIDGE_CONFIG`) must exist; the
    /// default `config.toml` is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let explicit: Option<PathBuf> = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(env_vars::CONFIG_PATH).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                info!(category = "config", "Loading config from: {}", path.display());
                Self::from_file(&path)?
            }
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!(category = "config", "Loading config from: {}", DEFAULT_CONFIG_FILE);
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => {
                info!(category = "config", "No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Overlay secrets from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(env_vars::MQTT_PASSWORD) {
            self.mqtt.password = password;
        }
        if let Ok(password) = std::env::var(env_vars::INFLUXDB_PASSWORD) {
            self.influxdb.password = password;
        }
        if let Ok(code) = std::env::var(env_vars::IOT_AUTH_CODE) {
            self.iot.auth_code = code;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.intake_capacity == 0 {
            return Err(Error::Validation("pipeline.intake_capacity must be > 0".into()));
        }
        if p.pending_capacity == 0 {
            return Err(Error::Validation("pipeline.pending_capacity must be > 0".into()));
        }
        if p.flush_interval_ms == 0 {
            return Err(Error::Validation("pipeline.flush_interval_ms must be > 0".into()));
        }
        if self.mqtt.host.is_empty() {
            return Err(Error::Validation("mqtt.host must not be empty".into()));
        }
        if self.influxdb.database.is_empty() {
            return Err(Error::Validation("influxdb.database must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_legacy_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.redis.offline_expire_secs, 604_800);
        assert_eq!(config.influxdb.database, "thingsroot");
        assert_eq!(config.pipeline.intake_capacity, 10_240);
        assert_eq!(config.pipeline.pending_capacity, 1_024);
        assert_eq!(config.user_app.port, 8828);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [mqtt]
            host = "broker.local"

            [pipeline]
            flush_interval_ms = 250
            write_timeout_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
        let pipeline = config.pipeline.to_pipeline_config();
        assert_eq!(pipeline.flush_interval, Duration::from_millis(250));
        assert_eq!(pipeline.write_timeout, None);
    }

    #[test]
    fn test_redis_database_url() {
        let redis = RedisSection {
            url: "redis://cache:6379/".to_string(),
            ..Default::default()
        };
        assert_eq!(redis.database_url(9), "redis://cache:6379/9");
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = BridgeConfig::default();
        config.pipeline.pending_capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }
}
