//! Connection pool keyed by endpoint
//!
//! Idle connections are kept per endpoint. Acquiring reuses an idle
//! connection or opens a new one; nothing is health-checked up front, a
//! stale connection simply fails its next command. Only the idle-set
//! bookkeeping happens under the lock - connecting and command exchange
//! happen outside it.

use crate::transport::{ConnectParams, Connector, StoreConnection, TransportError};
use crate::types::Endpoint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A connection lent to exactly one caller
pub struct PoolEntry {
    endpoint: Endpoint,
    conn: Box<dyn StoreConnection>,
}

impl PoolEntry {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn conn(&mut self) -> &mut dyn StoreConnection {
        self.conn.as_mut()
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub idle: usize,
}

/// Reusable connections per endpoint for one logical database
pub struct ConnectionPool {
    name: &'static str,
    connector: Arc<dyn Connector>,
    params: ConnectParams,
    max_idle: usize,
    idle: Mutex<HashMap<Endpoint, Vec<Box<dyn StoreConnection>>>>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl ConnectionPool {
    pub fn new(
        name: &'static str,
        connector: Arc<dyn Connector>,
        params: ConnectParams,
        max_idle: usize,
    ) -> Self {
        Self {
            name,
            connector,
            params,
            max_idle,
            idle: Mutex::new(HashMap::new()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Reuse an idle connection to `endpoint` or open a new one
    pub fn acquire(&self, endpoint: &Endpoint) -> Result<PoolEntry, TransportError> {
        let reused = self
            .idle
            .lock()
            .get_mut(endpoint)
            .and_then(|conns| conns.pop());

        if let Some(conn) = reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
            return Ok(PoolEntry {
                endpoint: endpoint.clone(),
                conn,
            });
        }

        let conn = self.connector.connect(endpoint, &self.params)?;
        self.created.fetch_add(1, Ordering::Relaxed);
        debug!("[{}] opened connection to {}", self.name, endpoint);

        Ok(PoolEntry {
            endpoint: endpoint.clone(),
            conn,
        })
    }

    /// Return a connection. Unhealthy ones are closed, never reused.
    pub fn release(&self, entry: PoolEntry, healthy: bool) {
        if !healthy {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("[{}] discarded connection to {}", self.name, entry.endpoint);
            return;
        }

        let mut idle = self.idle.lock();
        let conns = idle.entry(entry.endpoint).or_default();
        if conns.len() < self.max_idle {
            conns.push(entry.conn);
        }
    }

    /// Drop idle connections to endpoints that fail `keep`
    pub fn retain(&self, keep: impl Fn(&Endpoint) -> bool) {
        self.idle.lock().retain(|endpoint, _| keep(endpoint));
    }

    /// Close every idle connection
    pub fn clear(&self) {
        self.idle.lock().clear();
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.idle_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::memory::MemoryCluster;

    fn ep(host: &str) -> Endpoint {
        Endpoint::new(host, 6379)
    }

    fn setup(max_idle: usize) -> (MemoryCluster, ConnectionPool) {
        let cluster = MemoryCluster::new("mymaster")
            .with_master(ep("m"))
            .with_replica(ep("r"));
        let pool = ConnectionPool::new(
            "test",
            Arc::new(cluster.clone()),
            ConnectParams::default(),
            max_idle,
        );
        (cluster, pool)
    }

    #[test]
    fn test_acquire_reuses_released() {
        let (cluster, pool) = setup(4);

        let entry = pool.acquire(&ep("m")).unwrap();
        pool.release(entry, true);
        let mut entry = pool.acquire(&ep("m")).unwrap();
        assert!(entry.conn().execute(&Command::Ping).is_ok());
        pool.release(entry, true);

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(cluster.connections_opened(&ep("m")), 1);
    }

    #[test]
    fn test_unhealthy_is_discarded() {
        let (_cluster, pool) = setup(4);

        let entry = pool.acquire(&ep("m")).unwrap();
        pool.release(entry, false);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.stats().discarded, 1);

        pool.acquire(&ep("m")).unwrap();
        assert_eq!(pool.stats().created, 2);
    }

    #[test]
    fn test_idle_cap() {
        let (_cluster, pool) = setup(1);

        let a = pool.acquire(&ep("m")).unwrap();
        let b = pool.acquire(&ep("m")).unwrap();
        pool.release(a, true);
        pool.release(b, true);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_per_endpoint_idle_sets() {
        let (_cluster, pool) = setup(4);

        let m = pool.acquire(&ep("m")).unwrap();
        let r = pool.acquire(&ep("r")).unwrap();
        pool.release(m, true);
        pool.release(r, true);
        assert_eq!(pool.idle_count(), 2);

        pool.retain(|endpoint| endpoint == &ep("r"));
        assert_eq!(pool.idle_count(), 1);
        let entry = pool.acquire(&ep("r")).unwrap();
        assert_eq!(entry.endpoint(), &ep("r"));
        assert_eq!(pool.stats().reused, 1);

        pool.clear();
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_stale_connection_fails_lazily() {
        let (cluster, pool) = setup(4);

        let entry = pool.acquire(&ep("m")).unwrap();
        pool.release(entry, true);
        cluster.take_down(&ep("m"));
        cluster.bring_up(&ep("m"));

        // handed out without a check; the failure shows on use
        let mut entry = pool.acquire(&ep("m")).unwrap();
        assert!(entry.conn().execute(&Command::Ping).unwrap_err().is_connection());
        pool.release(entry, false);
    }

    #[test]
    fn test_connect_failure() {
        let (cluster, pool) = setup(4);
        cluster.take_down(&ep("m"));
        assert!(pool.acquire(&ep("m")).is_err());
        assert_eq!(pool.stats().created, 0);
    }
}
