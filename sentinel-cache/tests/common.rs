//! Common test utilities

use sentinel_cache::memory::MemoryCluster;
use sentinel_cache::{Cache, CacheConfig, Endpoint};
use std::sync::Arc;

#[allow(dead_code)] // Used by other test modules
pub fn master() -> Endpoint {
    Endpoint::new("redis-1", 6379)
}

#[allow(dead_code)] // Used by other test modules
pub fn replica() -> Endpoint {
    Endpoint::new("redis-2", 6379)
}

/// Two sentinels, a master and one replica
#[allow(dead_code)] // Used by other test modules
pub fn create_memory_cluster() -> MemoryCluster {
    MemoryCluster::new("mymaster")
        .with_sentinel(Endpoint::new("sentinel-1", 26379))
        .with_sentinel(Endpoint::new("sentinel-2", 26379))
        .with_master(master())
        .with_replica(replica())
}

/// Setup a cache on a fresh memory cluster
#[allow(dead_code)] // Used by other test modules
pub fn setup_test_cache() -> (MemoryCluster, Cache) {
    setup_test_cache_with(|config| config)
}

#[allow(dead_code)] // Used by other test modules
pub fn setup_test_cache_with(
    configure: impl FnOnce(CacheConfig) -> CacheConfig,
) -> (MemoryCluster, Cache) {
    let cluster = create_memory_cluster();
    let config = configure(
        CacheConfig::new(cluster.sentinel_location(0))
            .with_key_prefix("test")
            .with_default_timeout(None),
    );
    let cache = Cache::with_connector(config, Arc::new(cluster.clone())).unwrap();
    (cluster, cache)
}

/// Setup a cache for S2S tests (requires a running sentinel deployment)
#[allow(dead_code)] // Used by S2S test modules
pub fn setup_s2s_cache() -> Cache {
    let location = std::env::var("SENTINEL_LOCATION")
        .unwrap_or_else(|_| "mymaster/127.0.0.1:26379/15".to_string());
    let config = CacheConfig::new(location)
        .with_key_prefix("s2s")
        .with_socket_timeout(std::time::Duration::from_secs(5));
    Cache::new(config).expect("Failed to create S2S cache")
}
