//! Keeps the address space in step with device traffic.

use std::sync::Arc;

use async_trait::async_trait;
use iotbridge_core::message::DeviceInfo;
use iotbridge_core::{
    DataUpdate, InboundMessage, MessageHandler, MessageRouter, PointValue, RoutedMessage,
};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::address_space::{value_from_json, AddressSpace};
use super::user_api::OutputForwarder;
use crate::cache::{parent_key, CacheNamespace, CacheStore};
use crate::error::{BridgeError, BridgeResult};

pub struct OpcUaBridge {
    router: MessageRouter,
    space: RwLock<AddressSpace>,
    cache: Option<Arc<dyn CacheStore>>,
    forwarder: Arc<dyn OutputForwarder>,
}

impl OpcUaBridge {
    pub fn new(
        router: MessageRouter,
        space: AddressSpace,
        cache: Option<Arc<dyn CacheStore>>,
        forwarder: Arc<dyn OutputForwarder>,
    ) -> Self {
        Self {
            router,
            space: RwLock::new(space),
            cache,
            forwarder,
        }
    }

    /// Read access to the address space.
    pub fn with_space<R>(&self, f: impl FnOnce(&AddressSpace) -> R) -> R {
        f(&self.space.read())
    }

    /// Rebuild devices from cached descriptors and parent links.
    ///
    /// Returns the number of devices created.
    pub async fn load_from_cache(&self) -> BridgeResult<usize> {
        let Some(cache) = &self.cache else {
            return Ok(0);
        };

        let mut loaded = 0;
        for device_id in cache.keys(CacheNamespace::Config).await? {
            let Some(raw) = cache.get(CacheNamespace::Config, &device_id).await? else {
                continue;
            };
            let info: DeviceInfo = match serde_json::from_str(&raw) {
                Ok(info) => info,
                Err(e) => {
                    warn!(device_id = %device_id, "Skipping undecodable cached descriptor: {}", e);
                    continue;
                }
            };
            let gate = cache
                .get(CacheNamespace::Relation, &parent_key(&device_id))
                .await?;

            self.router.resolver().update_bindings(&device_id, &info);
            if self.register(&device_id, gate, &info).await? {
                loaded += 1;
            }
        }
        info!(devices = loaded, "Address space rebuilt from cache");
        Ok(loaded)
    }

    /// Apply one routed message.
    pub async fn apply(&self, message: &RoutedMessage) -> BridgeResult<()> {
        match message {
            RoutedMessage::Device(device) => {
                self.register(&device.device_id, device.gate.clone(), &device.descriptor)
                    .await?;
                Ok(())
            }
            RoutedMessage::Data(update) => {
                self.apply_data(update);
                Ok(())
            }
            RoutedMessage::Status(_) | RoutedMessage::Event(_) => Ok(()),
        }
    }

    /// Client write on a device variable.
    ///
    /// The new value is kept locally and forwarded to the platform as an
    /// output write. Read-only variables are rejected before forwarding.
    pub async fn write_variable(
        &self,
        device_id: &str,
        variable: &str,
        value: PointValue,
    ) -> BridgeResult<Value> {
        self.space
            .write()
            .write_value(device_id, variable, value.clone())?;
        info!(device_id, variable, value = %value, "Forwarding output write");
        self.forwarder
            .send_output(device_id, variable, "value", value.to_json())
            .await
    }

    /// Returns `false` when the descriptor has no type name.
    async fn register(
        &self,
        device_id: &str,
        gate: Option<String>,
        info: &DeviceInfo,
    ) -> BridgeResult<bool> {
        let created = self
            .space
            .write()
            .register_device(device_id, gate, info)
            .is_some();
        if !created {
            debug!(device_id, "Descriptor has no meta name, device not exposed");
            return Ok(false);
        }

        if let Some(cache) = &self.cache {
            let latest = cache.hgetall(CacheNamespace::Realtime, device_id).await?;
            let mut space = self.space.write();
            for input in info.inputs() {
                let Some(raw) = latest.get(&format!("{}/value", input.name)) else {
                    continue;
                };
                let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) else {
                    continue;
                };
                let (Some(ts), Some(raw_value)) = (items.first().and_then(Value::as_f64), items.get(1))
                else {
                    continue;
                };
                let Some(value) = value_from_json(raw_value, input.value_type()) else {
                    continue;
                };
                if let Err(e) = space.set_value(device_id, &input.name, value, ts) {
                    debug!(device_id, input = %input.name, "Cached value not applied: {}", e);
                }
            }
        }
        Ok(true)
    }

    fn apply_data(&self, update: &DataUpdate) {
        if update.property != "value" {
            return;
        }
        let result = self.space.write().set_value(
            &update.device_id,
            &update.input,
            update.value.clone(),
            update.timestamp,
        );
        match result {
            Ok(()) => {}
            Err(BridgeError::UnknownDevice(device)) => {
                warn!(device_id = %device, "Device node does not exist");
            }
            Err(e) => warn!("{}", e),
        }
    }
}

#[async_trait]
impl MessageHandler for OpcUaBridge {
    fn name(&self) -> &str {
        "mqtt_to_opcua"
    }

    async fn on_message(&self, message: InboundMessage) {
        let Some(routed) = self
            .router
            .route(&message.topic, &message.payload, message.retain)
        else {
            return;
        };
        if let Err(e) = self.apply(&routed).await {
            error!(
                topic = %message.topic,
                category = routed.category().as_str(),
                "Failed to update address space: {}",
                e
            );
        }
    }
}
