//! Sentinel S2S Integration Tests
//!
//! These tests require a running sentinel deployment.
//! Run with: SENTINEL_LOCATION=mymaster/127.0.0.1:26379/15 cargo test --test sentinel_s2s_test -- --ignored

mod common;

use num_bigint::BigInt;
use sentinel_cache::{SetOptions, Timeout};
use std::collections::HashSet;

fn unique_key(name: &str) -> String {
    format!(
        "{}:{}",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

#[test]
#[ignore = "requires running sentinel deployment"]
fn test_s2s_route_resolution() {
    let cache = common::setup_s2s_cache();
    let route = cache.client().route().unwrap();
    assert_eq!(route.generation, 1);
    assert!(!route.replicas.contains(&route.master));
}

#[test]
#[ignore = "requires running sentinel deployment"]
fn test_s2s_set_get_delete() {
    let cache = common::setup_s2s_cache();
    let key = unique_key("kv");

    assert!(cache
        .set(&key, "value", SetOptions::new().timeout(Timeout::Seconds(60)))
        .unwrap());
    assert_eq!(
        cache.get::<String, _>(&key, None).unwrap().as_deref(),
        Some("value")
    );
    assert!(cache.delete(&key, None).unwrap());
    assert!(cache.get::<String, _>(&key, None).unwrap().is_none());
}

#[test]
#[ignore = "requires running sentinel deployment"]
fn test_s2s_counter_past_i64() {
    let cache = common::setup_s2s_cache();
    let key = unique_key("counter");

    cache
        .set(&key, &i64::MAX, SetOptions::new().timeout(Timeout::Seconds(60)))
        .unwrap();
    let value = cache.incr(&key, 1, None).unwrap();
    assert_eq!(value, BigInt::from(i64::MAX) + 1);

    // the slow path keeps the remaining expiry
    let ttl = cache.ttl(&key, None).unwrap().unwrap();
    assert!((1..=60).contains(&ttl));
    cache.delete(&key, None).unwrap();
}

#[test]
#[ignore = "requires running sentinel deployment"]
fn test_s2s_scan_and_delete_pattern() {
    let cache = common::setup_s2s_cache();
    let base = unique_key("scan");
    let expected: HashSet<String> = (0..20).map(|i| format!("{}:{}", base, i)).collect();
    for key in &expected {
        cache
            .set(key, &1, SetOptions::new().timeout(Timeout::Seconds(60)))
            .unwrap();
    }

    let found: HashSet<String> = cache
        .iter_keys(&format!("{}:*", base), None, Some(5))
        .collect::<sentinel_cache::Result<_>>()
        .unwrap();
    assert_eq!(found, expected);

    assert_eq!(
        cache.delete_pattern(&format!("{}:*", base), None, Some(5)).unwrap(),
        20
    );
}

#[test]
#[ignore = "requires running sentinel deployment"]
fn test_s2s_lock() {
    let cache = common::setup_s2s_cache();
    let name = unique_key("lock");

    let mut first = cache.lock(&name, Some(std::time::Duration::from_secs(10)));
    let mut second = cache.lock(&name, None);
    assert!(first.acquire(false).unwrap());
    assert!(!second.acquire(false).unwrap());
    first.release().unwrap();
    assert!(second.acquire(false).unwrap());
    second.release().unwrap();
}
