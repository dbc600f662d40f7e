//! Failover Example
//!
//! Runs against the in-process sentinel deployment and promotes the replica
//! while the cache is in use.
//!
//! Usage:
//!   RUST_LOG=sentinel_cache=debug cargo run --example failover

use sentinel_cache::memory::MemoryCluster;
use sentinel_cache::{Cache, CacheConfig, Endpoint, SetOptions};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let master = Endpoint::new("redis-1", 6379);
    let replica = Endpoint::new("redis-2", 6379);
    let cluster = MemoryCluster::new("mymaster")
        .with_sentinel(Endpoint::new("sentinel-1", 26379))
        .with_sentinel(Endpoint::new("sentinel-2", 26379))
        .with_master(master.clone())
        .with_replica(replica.clone());

    let config = CacheConfig::new(cluster.sentinel_location(0))
        .with_key_prefix("demo")
        .with_read_from_replicas(true);
    let cache = Cache::with_connector(config, Arc::new(cluster.clone()))?;

    println!("🔁 Sentinel Cache - Failover Example\n");

    cache.set("order:1", "pending", SetOptions::new())?;
    let route = cache.client().route()?;
    println!("Master before: {} (generation {})", route.master, route.generation);

    // Hold a lock across the switch
    let mut lock = cache.lock("order:1:lock", Some(Duration::from_secs(30)));
    lock.acquire(true)?;

    println!("Promoting {} and stopping {}", replica, master);
    cluster.failover_to(&replica);
    cluster.take_down(&master);

    cache.set("order:1", "shipped", SetOptions::new())?;
    let status: Option<String> = cache.get("order:1", None)?;
    let route = cache.client().route()?;
    println!("Master after: {} (generation {})", route.master, route.generation);
    println!("order:1 = {:?}", status);

    lock.release()?;
    println!("Lock released on the new master");

    let stats = cache.client().stats();
    println!(
        "\nConnections: {} created, {} discarded",
        stats.write.created + stats.read.created,
        stats.write.discarded + stats.read.discarded
    );
    Ok(())
}
