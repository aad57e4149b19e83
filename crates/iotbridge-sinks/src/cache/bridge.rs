//! Mirrors device state into the key/value cache.
//!
//! | Namespace | Key | Value |
//! |-----------|-----|-------|
//! | status    | `<gate>` | `ONLINE` / `OFFLINE` |
//! | config    | `<device>` | descriptor JSON |
//! | relation  | `<gate>` | list of child devices |
//! | relation  | `PARENT_<device>` | gate id |
//! | realtime  | `<device>` | hash `<input>/<prop>` → `[ts, value, quality]` |
//!
//! Going OFFLINE puts every key of the gate and its children on a timer;
//! coming back ONLINE clears those timers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use iotbridge_core::router::parse_topic;
use iotbridge_core::{
    Category, DataUpdate, DeviceAnnouncement, InboundMessage, MessageHandler, MessageRouter,
    RawDataUpdate, RoutedMessage, StatusChange,
};
use tracing::{debug, error, warn};

use super::store::{CacheNamespace, CacheStore};
use crate::error::BridgeResult;

/// Upper bound on a gate's child list.
pub const MAX_CHILDREN: usize = 1000;

/// Key of a device's parent link in the relation namespace.
pub fn parent_key(device_id: &str) -> String {
    format!("PARENT_{}", device_id)
}

pub struct CacheBridge {
    router: MessageRouter,
    store: Arc<dyn CacheStore>,
    offline_ttl: Duration,
}

impl CacheBridge {
    pub fn new(router: MessageRouter, store: Arc<dyn CacheStore>, offline_ttl: Duration) -> Self {
        Self {
            router,
            store,
            offline_ttl,
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Apply one routed message to the cache.
    pub async fn apply(&self, message: &RoutedMessage) -> BridgeResult<()> {
        match message {
            RoutedMessage::Data(update) => self.apply_data(update).await,
            RoutedMessage::Device(device) => self.apply_device(device).await,
            RoutedMessage::Status(status) => self.apply_status(status).await,
            RoutedMessage::Event(event) => {
                debug!(device_id = %event.device_id, "Event has no cache representation");
                Ok(())
            }
        }
    }

    async fn apply_data(&self, update: &DataUpdate) -> BridgeResult<()> {
        let encoded = serde_json::to_string(&update.raw_data)?;
        self.store_realtime(&update.device_id, &update.input_path, &encoded)
            .await
    }

    /// Store a data array exactly as published.
    pub async fn apply_raw_data(&self, update: &RawDataUpdate) -> BridgeResult<()> {
        let encoded = serde_json::to_string(&update.data)?;
        self.store_realtime(&update.device_id, &update.input_path, &encoded)
            .await
    }

    async fn store_realtime(
        &self,
        device_id: &str,
        input_path: &str,
        encoded: &str,
    ) -> BridgeResult<()> {
        self.store
            .hset(CacheNamespace::Realtime, device_id, input_path, encoded)
            .await?;
        Ok(())
    }

    async fn apply_device(&self, device: &DeviceAnnouncement) -> BridgeResult<()> {
        let device_id = device.device_id.as_str();

        match &device.gate {
            Some(gate) => {
                let mut children = self
                    .store
                    .list_range(CacheNamespace::Relation, gate, MAX_CHILDREN)
                    .await?;
                if !children.iter().any(|child| child == device_id) {
                    children.push(device_id.to_string());
                }
                if children.len() > MAX_CHILDREN {
                    let excess = children.len() - MAX_CHILDREN;
                    children.drain(..excess);
                }
                self.store
                    .replace_list(CacheNamespace::Relation, gate, &children)
                    .await?;
            }
            None => warn!(device_id, "Device descriptor without gate, relation not recorded"),
        }

        let info = serde_json::to_string(&device.info)?;
        self.store.persist(CacheNamespace::Realtime, device_id).await?;
        self.store.persist(CacheNamespace::Config, device_id).await?;
        self.store
            .set(CacheNamespace::Config, device_id, &info)
            .await?;

        if let Some(gate) = &device.gate {
            let parent = parent_key(device_id);
            self.store.persist(CacheNamespace::Relation, &parent).await?;
            self.store
                .set(CacheNamespace::Relation, &parent, gate)
                .await?;
        }
        Ok(())
    }

    async fn apply_status(&self, status: &StatusChange) -> BridgeResult<()> {
        let gate = status.device_id.as_str();
        self.store
            .set(CacheNamespace::Status, gate, status.status_str())
            .await?;

        let children = self
            .store
            .list_range(CacheNamespace::Relation, gate, MAX_CHILDREN)
            .await?;

        let mut keys = vec![
            (CacheNamespace::Status, gate.to_string()),
            (CacheNamespace::Relation, gate.to_string()),
        ];
        for child in &children {
            keys.push((CacheNamespace::Config, child.clone()));
            keys.push((CacheNamespace::Realtime, child.clone()));
            keys.push((CacheNamespace::Relation, parent_key(child)));
        }

        try_join_all(keys.iter().map(|(ns, key)| async move {
            if status.online {
                self.store.persist(*ns, key).await
            } else {
                self.store.expire(*ns, key, self.offline_ttl).await
            }
        }))
        .await?;
        debug!(
            gate,
            status = status.status_str(),
            children = children.len(),
            "Gate status applied"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for CacheBridge {
    fn name(&self) -> &str {
        "mqtt_to_redis"
    }

    async fn on_message(&self, message: InboundMessage) {
        // Live data is cached as published, whether or not it coerces.
        if matches!(parse_topic(&message.topic), Some((_, Category::Data))) {
            let Some(update) = self.router.route_raw_data(
                &message.topic,
                &message.payload,
                message.retain,
            ) else {
                return;
            };
            if let Err(e) = self.apply_raw_data(&update).await {
                error!(
                    topic = %message.topic,
                    store = self.store.name(),
                    "Failed to cache data: {}",
                    e
                );
            }
            return;
        }

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
                store = self.store.name(),
                "Failed to update cache: {}",
                e
            );
        }
    }
}
