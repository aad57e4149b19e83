//! Cache Bridge Tests
//!
//! Tests the cache bridge against the in-memory store:
//! - OFFLINE puts every gate and child key on the offline timer
//! - ONLINE within the window clears all timers
//! - Keys vanish once the timer elapses
//! - Live data stored as published, coercible or not
//

use std::sync::Arc;
use std::time::Duration;

use iotbridge_core::{InboundMessage, ManualClock, MessageHandler, MessageRouter, ValueResolver};
use iotbridge_sinks::cache::{CacheBridge, CacheNamespace, CacheStore, MemoryCacheStore};
use serde_json::json;

const WEEK: Duration = Duration::from_secs(604_800);

struct Fixture {
    bridge: CacheBridge,
    store: Arc<MemoryCacheStore>,
    clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
    let clock = Arc::new(ManualClock::new(1_700_000_000.0));
    let store = Arc::new(MemoryCacheStore::new(clock.clone()));
    let router = MessageRouter::new(Arc::new(ValueResolver::new()), clock.clone());
    Fixture {
        bridge: CacheBridge::new(router, store.clone(), WEEK),
        store,
        clock,
    }
}

async fn send(bridge: &CacheBridge, topic: &str, payload: serde_json::Value) {
    bridge
        .on_message(InboundMessage::new(topic, payload.to_string(), false))
        .await;
}

/// Gate `g1` with children `d1` and `d2`, each with config and live data.
async fn seed(bridge: &CacheBridge) {
    for device in ["d1", "d2"] {
        send(
            bridge,
            &format!("{}/device", device),
            json!({"gate": "g1", "info": {"meta": {"name": "Sensor"}, "inputs": [{"name": "temp"}]}}),
        )
        .await;
        send(
            bridge,
            &format!("{}/data", device),
            json!({"input": "temp/value", "data": [1_700_000_000.0, 20.5, 0]}),
        )
        .await;
    }
    send(bridge, "g1/status", json!({"status": "ONLINE", "gate": "g1"})).await;
}

fn tracked_keys() -> Vec<(CacheNamespace, &'static str)> {
    vec![
        (CacheNamespace::Status, "g1"),
        (CacheNamespace::Relation, "g1"),
        (CacheNamespace::Config, "d1"),
        (CacheNamespace::Config, "d2"),
        (CacheNamespace::Realtime, "d1"),
        (CacheNamespace::Realtime, "d2"),
        (CacheNamespace::Relation, "PARENT_d1"),
        (CacheNamespace::Relation, "PARENT_d2"),
    ]
}

#[tokio::test]
async fn test_offline_sets_timer_on_all_keys() {
    let f = fixture();
    seed(&f.bridge).await;

    send(&f.bridge, "g1/status", json!({"status": "OFFLINE", "gate": "g1"})).await;

    assert_eq!(
        f.store.get(CacheNamespace::Status, "g1").await.unwrap().as_deref(),
        Some("OFFLINE")
    );
    for (ns, key) in tracked_keys() {
        assert_eq!(
            f.store.ttl(ns, key).await.unwrap(),
            Some(WEEK),
            "{}:{} should expire",
            ns,
            key
        );
    }
}

#[tokio::test]
async fn test_online_within_window_persists_all_keys() {
    let f = fixture();
    seed(&f.bridge).await;

    send(&f.bridge, "g1/status", json!({"status": "OFFLINE", "gate": "g1"})).await;
    f.clock.advance(3600.0 * 24.0 * 3.0);
    send(&f.bridge, "g1/status", json!({"status": "ONLINE", "gate": "g1"})).await;

    for (ns, key) in tracked_keys() {
        assert_eq!(f.store.ttl(ns, key).await.unwrap(), None, "{}:{} should persist", ns, key);
    }

    // Well past the first deadline, everything is still there.
    f.clock.advance(3600.0 * 24.0 * 30.0);
    assert!(f.store.get(CacheNamespace::Config, "d1").await.unwrap().is_some());
    assert_eq!(
        f.store.hgetall(CacheNamespace::Realtime, "d2").await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_offline_keys_expire_after_window() {
    let f = fixture();
    seed(&f.bridge).await;

    send(&f.bridge, "g1/status", json!({"status": "OFFLINE", "gate": "g1"})).await;
    f.clock.advance(WEEK.as_secs_f64());

    for (ns, key) in tracked_keys() {
        assert_eq!(f.store.ttl(ns, key).await.unwrap(), None);
    }
    assert!(f.store.keys(CacheNamespace::Config).await.unwrap().is_empty());
    assert!(f.store.is_empty());
}

#[tokio::test]
async fn test_reannounce_persists_device_keys() {
    let f = fixture();
    seed(&f.bridge).await;
    send(&f.bridge, "g1/status", json!({"status": "OFFLINE", "gate": "g1"})).await;

    send(
        &f.bridge,
        "d1/device",
        json!({"gate": "g1", "info": {"meta": {"name": "Sensor"}}}),
    )
    .await;

    assert_eq!(f.store.ttl(CacheNamespace::Config, "d1").await.unwrap(), None);
    assert_eq!(f.store.ttl(CacheNamespace::Realtime, "d1").await.unwrap(), None);
    assert_eq!(f.store.ttl(CacheNamespace::Relation, "PARENT_d1").await.unwrap(), None);
    // The sibling keeps its timer.
    assert_eq!(f.store.ttl(CacheNamespace::Config, "d2").await.unwrap(), Some(WEEK));
}

#[tokio::test]
async fn test_retained_data_not_cached() {
    let f = fixture();
    f.bridge
        .on_message(InboundMessage::new(
            "d1/data",
            json!({"input": "temp/value", "data": [1.0, 2.0, 0]}).to_string(),
            true,
        ))
        .await;
    assert!(f.store.is_empty());
}

#[tokio::test]
async fn test_uncoercible_data_is_cached_as_published() {
    let f = fixture();
    send(&f.bridge, "d1/data", json!({"input": "temp/value", "data": [1.0, null, 0]})).await;
    send(&f.bridge, "d1/data", json!({"input": "pos/value", "data": [1.0, [1, 2], 0]})).await;
    send(&f.bridge, "d1/data", json!({"input": "raw/value", "data": [1.0]})).await;

    let realtime = f.store.hgetall(CacheNamespace::Realtime, "d1").await.unwrap();
    assert_eq!(realtime.len(), 3);
    assert_eq!(realtime.get("temp/value").map(String::as_str), Some("[1.0,null,0]"));
    assert_eq!(realtime.get("pos/value").map(String::as_str), Some("[1.0,[1,2],0]"));
    assert_eq!(realtime.get("raw/value").map(String::as_str), Some("[1.0]"));
}
