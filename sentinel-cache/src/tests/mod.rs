//! Test utilities

use crate::memory::MemoryCluster;
use crate::types::Endpoint;

/// In-process service with one sentinel, a master and one replica
pub fn create_memory_cluster() -> MemoryCluster {
    MemoryCluster::new("mymaster")
        .with_sentinel(Endpoint::new("sentinel-1", 26379))
        .with_master(Endpoint::new("redis-1", 6379))
        .with_replica(Endpoint::new("redis-2", 6379))
}

/// Common test utilities
pub mod helpers {
    use super::*;
    use crate::{Cache, CacheConfig};
    use std::sync::Arc;

    /// Cache with prefix `test` on a fresh memory cluster
    pub fn setup_test_cache() -> (MemoryCluster, Cache) {
        setup_test_cache_with(|config| config)
    }

    /// Same as [`setup_test_cache`] with a tweaked configuration
    pub fn setup_test_cache_with(
        configure: impl FnOnce(CacheConfig) -> CacheConfig,
    ) -> (MemoryCluster, Cache) {
        let cluster = create_memory_cluster();
        let config = configure(CacheConfig::new(cluster.sentinel_location(0)).with_key_prefix("test"));
        let cache = Cache::with_connector(config, Arc::new(cluster.clone())).unwrap();
        (cluster, cache)
    }
}
