//! Client for the IoT platform's device API.
//!
//! All calls go to `<iot.url>/api/method/iot.<path>` with the
//! `AuthorizationCode` header and return the response's `message` field.

use std::time::Duration;

use async_trait::async_trait;
use iotbridge_core::config::IotSection;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::error::{BridgeError, BridgeResult};

/// Header carrying the platform auth code.
pub const AUTH_HEADER: &str = "AuthorizationCode";

/// Forwards client writes on output variables to the platform.
#[async_trait]
pub trait OutputForwarder: Send + Sync {
    async fn send_output(
        &self,
        device: &str,
        output: &str,
        prop: &str,
        value: Value,
    ) -> BridgeResult<Value>;
}

pub struct UserApi {
    api_base: String,
    auth_code: String,
    http_client: reqwest::Client,
}

impl UserApi {
    pub fn new(url: &str, auth_code: impl Into<String>) -> BridgeResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_base: format!("{}/api/method/iot.", url.trim_end_matches('/')),
            auth_code: auth_code.into(),
            http_client,
        })
    }

    pub fn from_section(section: &IotSection) -> BridgeResult<Self> {
        Self::new(&section.url, section.auth_code.clone())
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> BridgeResult<Value> {
        let request = self
            .http_client
            .get(self.api_url(path))
            .header(AUTH_HEADER, &self.auth_code)
            .header("Accept", "application/json")
            .query(query);
        Self::message(path, request.send().await?).await
    }

    async fn post(&self, path: &str, body: &Value) -> BridgeResult<Value> {
        let request = self
            .http_client
            .post(self.api_url(path))
            .header(AUTH_HEADER, &self.auth_code)
            .header("Accept", "application/json")
            .json(body);
        Self::message(path, request.send().await?).await
    }

    async fn message(path: &str, response: reqwest::Response) -> BridgeResult<Value> {
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(path, status = status.as_u16(), "Platform call failed: {}", body);
            return Err(BridgeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        let mut payload: Value = response.json().await?;
        debug!(path, "Platform call succeeded");
        Ok(payload
            .get_mut("message")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    pub async fn get_user(&self) -> BridgeResult<Value> {
        self.get("user_api.get_user", &[]).await
    }

    pub async fn access_device(&self, device_sn: &str) -> BridgeResult<Value> {
        self.get("user_api.access_device", &[("sn", device_sn)]).await
    }

    pub async fn send_command(
        &self,
        device: &str,
        command: &str,
        param: Option<Value>,
    ) -> BridgeResult<Value> {
        let body = json!({
            "device": device,
            "cmd": command,
            "param": param,
        });
        self.post("device_api.send_command", &body).await
    }

    pub async fn action_result(&self, id: &str) -> BridgeResult<Value> {
        self.get("device_api.get_action_result", &[("id", id)]).await
    }
}

#[async_trait]
impl OutputForwarder for UserApi {
    async fn send_output(
        &self,
        device: &str,
        output: &str,
        prop: &str,
        value: Value,
    ) -> BridgeResult<Value> {
        let body = json!({
            "device": device,
            "output": output,
            "prop": prop,
            "value": value,
        });
        self.post("device_api.send_output", &body).await
    }
}

/// One forwarded output write.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardedOutput {
    pub device: String,
    pub output: String,
    pub prop: String,
    pub value: Value,
}

/// Forwarder that records calls instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    calls: Mutex<Vec<ForwardedOutput>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ForwardedOutput> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl OutputForwarder for RecordingForwarder {
    async fn send_output(
        &self,
        device: &str,
        output: &str,
        prop: &str,
        value: Value,
    ) -> BridgeResult<Value> {
        self.calls.lock().push(ForwardedOutput {
            device: device.to_string(),
            output: output.to_string(),
            prop: prop.to_string(),
            value,
        });
        Ok(Value::Null)
    }
}
