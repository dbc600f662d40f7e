//! Basic Cache Example
//!
//! This example demonstrates basic cache operations against a sentinel
//! deployment.
//!
//! Usage:
//!   SENTINEL_LOCATION=mymaster/127.0.0.1:26379/0 cargo run --example basic

use sentinel_cache::{Cache, CacheConfig, SetOptions, Timeout};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let location = std::env::var("SENTINEL_LOCATION")
        .unwrap_or_else(|_| "mymaster/127.0.0.1:26379/0".to_string());
    let cache = Cache::new(CacheConfig::new(location).with_key_prefix("example"))?;

    println!("🚀 Sentinel Cache - Basic Example\n");
    println!("Route: {}\n", cache.client().describe());

    // 1. SET and GET
    println!("1. Setting key 'greeting' = 'Hello, Sentinel!'");
    cache.set("greeting", "Hello, Sentinel!", SetOptions::new())?;
    let value: Option<String> = cache.get("greeting", None)?;
    println!("   Value: {:?}\n", value);

    // 2. SET with TTL (10 seconds)
    println!("2. Setting key 'session' with 10s TTL");
    cache.set(
        "session",
        "temporary-token",
        SetOptions::new().timeout(Timeout::Seconds(10)),
    )?;
    println!("   TTL: {:?}\n", cache.ttl("session", None)?);

    // 3. Counters
    println!("3. Counters");
    cache.set("counter", &0, SetOptions::new())?;
    println!("   After INCR: {}", cache.incr("counter", 1, None)?);
    println!("   After INCR 5: {}", cache.incr("counter", 5, None)?);
    println!("   After DECR: {}\n", cache.decr("counter", 1, None)?);

    // 4. Add only when missing
    println!("4. Add");
    println!("   add('greeting'): {}", cache.add("greeting", "ignored", Timeout::Default)?);
    println!("   add('fresh'): {}\n", cache.add("fresh", "value", Timeout::Default)?);

    // 5. Key discovery
    println!("5. Keys matching '*'");
    for key in cache.iter_keys("*", None, Some(10)) {
        println!("   - {}", key?);
    }

    // 6. Cleanup
    let deleted = cache.delete_many(["greeting", "session", "counter", "fresh"], None)?;
    println!("\n6. Deleted {} keys", deleted);

    cache.close();
    Ok(())
}
