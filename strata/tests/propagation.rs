mod common;

use bytes::Bytes;
use common::*;
use serde_json::json;
use shared::config::CacheSettings;
use std::io;
use storage_engine::{LocalBus, MemoryRemoteStore};
use strata::ports::Bus;
use strata::StoreValue;

#[tokio::test]
async fn test_put_refreshes_peer() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(settings(), &remote, &bus).await;

    a.engine("users")
        .await
        .put(42, Some(User::new(42, "alice")))
        .await
        .unwrap();

    let peer = b.engine("users").await;
    wait_for_local(&peer, 42, Some(StoreValue::Value(User::new(42, "alice")))).await;
}

#[tokio::test]
async fn test_evict_on_one_node_drops_key_on_peer() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(settings(), &remote, &bus).await;
    let users_a = a.engine("users").await;
    let users_b = b.engine("users").await;

    users_a.put(42, Some(User::new(42, "alice"))).await.unwrap();
    assert_eq!(
        users_b.lookup(&42).await.unwrap(),
        Some(StoreValue::Value(User::new(42, "alice")))
    );

    let mut messages = bus.subscribe(TOPIC).await.unwrap();
    users_a.evict(&42).await.unwrap();

    assert_eq!(
        next_message(&mut messages).await.unwrap(),
        json!({"cacheName": "users", "key": 42})
    );
    wait_for_local(&users_b, 42, None).await;
    assert_eq!(users_b.lookup(&42).await.unwrap(), None);
}

#[tokio::test]
async fn test_other_names_are_unaffected_by_evict() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(settings(), &remote, &bus).await;

    let orders_b = b.engine("orders").await;
    orders_b.put(42, Some(User::new(42, "order"))).await.unwrap();

    let users_a = a.engine("users").await;
    users_a.put(42, Some(User::new(42, "user"))).await.unwrap();
    users_a.evict(&42).await.unwrap();

    wait_for_local(&b.engine("users").await, 42, None).await;
    assert_eq!(
        orders_b.get_local(&42).await,
        Some(StoreValue::Value(User::new(42, "order")))
    );
}

#[tokio::test]
async fn test_clear_all_is_isolated_to_its_cache() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(settings(), &remote, &bus).await;

    let users_b = b.engine("users").await;
    let orders_b = b.engine("orders").await;
    users_b.put(1, Some(User::new(1, "u"))).await.unwrap();
    orders_b.put(1, Some(User::new(1, "o"))).await.unwrap();

    let mut messages = bus.subscribe(TOPIC).await.unwrap();
    a.engine("users").await.clear().await.unwrap();
    assert_eq!(
        next_message(&mut messages).await.unwrap(),
        json!({"cacheName": "users"})
    );

    wait_for_local(&users_b, 1, None).await;
    assert_eq!(
        orders_b.get_local(&1).await,
        Some(StoreValue::Value(User::new(1, "o")))
    );
    assert_eq!(remote.keys(), vec!["app:orders::1"]);
}

#[tokio::test]
async fn test_null_marker_propagates_without_remote_write() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(settings(), &remote, &bus).await;

    let value = a
        .engine("users")
        .await
        .get(404, || async { Ok::<Option<User>, io::Error>(None) })
        .await
        .unwrap();
    assert_eq!(value, None);

    wait_for_local(&b.engine("users").await, 404, Some(StoreValue::Null)).await;
    assert!(remote.is_empty());
}

#[tokio::test]
async fn test_listener_survives_malformed_payloads() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(settings(), &remote, &bus).await;

    let users_b = b.engine("users").await;
    users_b.put(1, Some(User::new(1, "u"))).await.unwrap();

    bus.publish(TOPIC, Bytes::from_static(b"{not json"))
        .await
        .unwrap();
    bus.publish(TOPIC, Bytes::from_static(br#"{"cacheName":"users","value":{"value":1}}"#))
        .await
        .unwrap();

    a.engine("users").await.evict(&1).await.unwrap();
    wait_for_local(&users_b, 1, None).await;
}

#[tokio::test]
async fn test_static_peer_ignores_unknown_caches() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(
        CacheSettings {
            cache_names: vec!["orders".to_string()],
            dynamic: false,
            ..settings()
        },
        &remote,
        &bus,
    )
    .await;

    let users_a = a.engine("users").await;
    users_a.put(1, Some(User::new(1, "u"))).await.unwrap();
    users_a.evict(&1).await.unwrap();

    // the listener handles messages in order, so once this refresh lands the
    // earlier envelopes for "users" have been dropped
    a.engine("orders")
        .await
        .put(1, Some(User::new(1, "o")))
        .await
        .unwrap();
    wait_for_local(
        &b.engine("orders").await,
        1,
        Some(StoreValue::Value(User::new(1, "o"))),
    )
    .await;

    assert_eq!(b.registry.cache_names().await, vec!["orders"]);
    assert!(b.registry.get("users").await.unwrap().is_none());
}

#[tokio::test]
async fn test_dynamic_peer_only_applies_to_existing_engines() {
    let remote = MemoryRemoteStore::new();
    let bus = LocalBus::new();
    let a = node(settings(), &remote, &bus).await;
    let b = node(
        CacheSettings {
            cache_names: Vec::new(),
            ..settings()
        },
        &remote,
        &bus,
    )
    .await;

    a.engine("sessions")
        .await
        .put(1, Some(User::new(1, "s")))
        .await
        .unwrap();

    // b never asked for "sessions", so the refresh does not create it
    let orders_a = a.engine("orders").await;
    let orders_b = b.engine("orders").await;
    orders_a.put(2, Some(User::new(2, "o"))).await.unwrap();
    wait_for_local(&orders_b, 2, Some(StoreValue::Value(User::new(2, "o")))).await;

    assert_eq!(b.registry.cache_names().await, vec!["orders"]);
}
