//! rumqttc transport driving a [`MessageHandler`].
//!
//! One connection per process. The event loop is polled until shutdown;
//! rumqttc reconnects on the next poll after an error, so connection loss
//! only pauses delivery. Subscriptions are re-sent on every CONNACK.

use std::sync::Arc;
use std::time::Duration;

use iotbridge_core::config::MqttSection;
use iotbridge_core::{InboundMessage, MessageHandler, SUBSCRIBE_TOPICS};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Request channel capacity between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 10;

/// Consecutive poll errors before the log level is raised.
const MAX_QUIET_ERRORS: u32 = 5;

/// Delay between polls after an error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Largest retry delay once errors keep piling up.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Transport errors.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Connection settings for one bridge process.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keepalive: Duration,
    pub client_id: String,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            keepalive: Duration::from_secs(60),
            client_id: client_id.into(),
        }
    }

    /// Build from the `[mqtt]` config section.
    pub fn from_section(section: &MqttSection, client_id: impl Into<String>) -> Self {
        let mut config = Self::new(section.host.clone(), section.port, client_id)
            .with_keepalive(Duration::from_secs(section.keepalive));
        if !section.user.is_empty() {
            config = config.with_auth(section.user.clone(), section.password.clone());
        }
        config
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Append a random suffix so several instances can share a broker.
    pub fn with_unique_suffix(mut self) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        self.client_id = format!("{}-{}", self.client_id, &suffix[..8]);
        self
    }

    pub fn validate(&self) -> Result<(), MqttError> {
        if self.host.is_empty() {
            return Err(MqttError::Configuration("broker host is empty".into()));
        }
        if self.client_id.trim().is_empty() || self.client_id.starts_with(char::is_whitespace) {
            return Err(MqttError::Configuration(format!(
                "invalid client id: {:?}",
                self.client_id
            )));
        }
        if self.keepalive < Duration::from_secs(1) {
            return Err(MqttError::Configuration("keepalive must be at least 1s".into()));
        }
        Ok(())
    }

    /// rumqttc options for this config.
    pub fn options(&self) -> Result<MqttOptions, MqttError> {
        self.validate()?;
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keepalive);
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            options.set_credentials(user, pass);
        }
        Ok(options)
    }
}

/// What the loop should do after one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Broker accepted the session; (re)subscribe.
    Connected,
    /// A publish was handed to the handler.
    Delivered,
    Ignored,
}

/// Single-connection MQTT transport.
pub struct MqttTransport {
    config: MqttConfig,
}

impl MqttTransport {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    /// Connect and deliver messages to `handler` until `shutdown` flips.
    pub async fn run(
        &self,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), MqttError> {
        let options = self.config.options()?;
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        info!(
            handler = handler.name(),
            client_id = %self.config.client_id,
            "Connecting to MQTT broker {}:{}",
            self.config.host,
            self.config.port
        );

        let mut error_count: u32 = 0;
        loop {
            let polled = tokio::select! {
                polled = eventloop.poll() => polled,
                _ = shutdown.changed() => break,
            };

            match polled {
                Ok(event) => {
                    error_count = 0;
                    if dispatch(event, handler.as_ref()).await == Step::Connected {
                        subscribe_all(&client).await;
                        handler.on_connect().await;
                    }
                }
                Err(e) => {
                    if error_count == 0 {
                        handler.on_disconnect().await;
                    }
                    error_count = error_count.saturating_add(1);
                    if error_count >= MAX_QUIET_ERRORS {
                        error!(
                            handler = handler.name(),
                            attempts = error_count,
                            "MQTT connection still failing: {}",
                            e
                        );
                    } else {
                        warn!(
                            handler = handler.name(),
                            "MQTT error ({}/{}): {}",
                            error_count,
                            MAX_QUIET_ERRORS,
                            e
                        );
                    }
                    let delay = retry_delay(error_count);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!("MQTT disconnect request not sent: {}", e);
        }
        info!(handler = handler.name(), "MQTT transport stopped");
        Ok(())
    }
}

fn retry_delay(error_count: u32) -> Duration {
    if error_count < MAX_QUIET_ERRORS {
        RETRY_DELAY
    } else {
        let exponent = (error_count - MAX_QUIET_ERRORS).min(5);
        (RETRY_DELAY * 2u32.pow(exponent)).min(MAX_RETRY_DELAY)
    }
}

async fn subscribe_all(client: &AsyncClient) {
    for topic in SUBSCRIBE_TOPICS {
        if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
            warn!("Failed to subscribe to {}: {}", topic, e);
        } else {
            debug!("Subscribed to {}", topic);
        }
    }
}

pub(crate) async fn dispatch(event: Event, handler: &dyn MessageHandler) -> Step {
    match event {
        Event::Incoming(Packet::Publish(publish)) => {
            let message = InboundMessage::new(
                publish.topic.to_string(),
                publish.payload.to_vec(),
                publish.retain,
            );
            handler.on_message(message).await;
            Step::Delivered
        }
        Event::Incoming(Packet::ConnAck(_)) => {
            info!(handler = handler.name(), "MQTT connection acknowledged");
            Step::Connected
        }
        _ => Step::Ignored,
    }
}
