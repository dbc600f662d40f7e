//! Failover-aware client
//!
//! Every command is routed through the current [`ResolvedRoute`]. A
//! connection-level failure discards the connection, forces one route
//! refresh and retries the command once against the new route. A READONLY
//! reply from the routed master counts as such a failure. Other error
//! replies from the store are never retried.

use crate::command::{Command, Reply};
use crate::config::{CacheConfig, CacheOptions, ReplicaPolicy};
use crate::error::{CacheError, Result};
use crate::location::{parse_direct_location, parse_sentinel_location};
use crate::pool::{ConnectionPool, PoolStats};
use crate::sentinel::{RouteProvider, SentinelRegistry, StaticRoutes};
use crate::transport::{ConnectParams, Connector, StoreConnection, TransportError};
use crate::types::{Endpoint, ResolvedRoute, Routing};
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, warn};

/// Result of a call together with where it was served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served<T> {
    pub value: T,
    pub endpoint: Endpoint,
    /// Generation of the route that served the call
    pub generation: u64,
}

/// Connection counters of both pools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub write: PoolStats,
    pub read: PoolStats,
}

struct Attempt {
    endpoint: Endpoint,
    error: TransportError,
}

struct ClientInner {
    provider: Arc<dyn RouteProvider>,
    key_prefix: Option<String>,
    write_pool: ConnectionPool,
    read_pool: ConnectionPool,
    database: i64,
    read_from_replicas: bool,
    replica_policy: ReplicaPolicy,
    next_replica: AtomicUsize,
}

/// Thread-safe client; clones share pools and the route cache
#[derive(Clone)]
pub struct FailoverClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for FailoverClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverClient")
            .field("route", &self.inner.provider.describe())
            .field("database", &self.inner.database)
            .field("read_from_replicas", &self.inner.read_from_replicas)
            .finish()
    }
}

impl FailoverClient {
    pub fn new(
        provider: Arc<dyn RouteProvider>,
        connector: Arc<dyn Connector>,
        params: ConnectParams,
        options: &CacheOptions,
    ) -> Self {
        let max_idle = options.max_idle_per_endpoint;
        Self {
            inner: Arc::new(ClientInner {
                provider,
                key_prefix: None,
                write_pool: ConnectionPool::new(
                    "write",
                    Arc::clone(&connector),
                    params.clone(),
                    max_idle,
                ),
                read_pool: ConnectionPool::new("read", connector, params.clone(), max_idle),
                database: params.database,
                read_from_replicas: options.read_from_replicas,
                replica_policy: options.replica_policy,
                next_replica: AtomicUsize::new(0),
            }),
        }
    }

    /// Attach the key prefix of the service this client talks to
    pub fn with_key_prefix(mut self, key_prefix: Option<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.key_prefix = key_prefix;
        }
        self
    }

    /// Key prefix carried by the service topology, if any
    pub fn key_prefix(&self) -> Option<&str> {
        self.inner.key_prefix.as_deref()
    }

    /// Logical database commands run against
    pub fn database(&self) -> i64 {
        self.inner.database
    }

    pub fn reads_from_replicas(&self) -> bool {
        self.inner.read_from_replicas
    }

    /// Current route, resolving it if nothing is cached yet
    pub fn route(&self) -> Result<Arc<ResolvedRoute>> {
        self.inner.provider.current()
    }

    pub fn describe(&self) -> String {
        self.inner.provider.describe()
    }

    /// Execute one command
    pub fn execute(&self, command: &Command, routing: Routing) -> Result<Reply> {
        self.run(command.name(), routing, None, |conn| conn.execute(command))
            .map(|served| served.value)
    }

    /// Execute one command, preferring `pin` when it is still part of the route
    pub fn execute_pinned(
        &self,
        command: &Command,
        routing: Routing,
        pin: Option<&Endpoint>,
    ) -> Result<Served<Reply>> {
        self.run(command.name(), routing, pin, |conn| conn.execute(command))
    }

    /// Send a batch of commands over one connection
    pub fn pipeline(&self, commands: &[Command], routing: Routing) -> Result<Vec<Reply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        self.run("PIPELINE", routing, None, |conn| conn.pipeline(commands))
            .map(|served| served.value)
    }

    /// Drop every pooled connection
    pub fn close(&self) {
        self.inner.write_pool.clear();
        self.inner.read_pool.clear();
        debug!("Closed all pooled connections");
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            write: self.inner.write_pool.stats(),
            read: self.inner.read_pool.stats(),
        }
    }

    fn run<T>(
        &self,
        label: &str,
        routing: Routing,
        pin: Option<&Endpoint>,
        op: impl Fn(&mut dyn StoreConnection) -> std::result::Result<T, TransportError>,
    ) -> Result<Served<T>> {
        let route = self.inner.provider.current()?;

        let failed = match self.attempt(label, &route, routing, pin, &op) {
            Ok(served) => return Ok(served),
            Err(Attempt {
                error: TransportError::Response(message),
                ..
            }) => return Err(CacheError::Store(message)),
            Err(failed) => failed,
        };

        warn!(
            "{} on {} failed: {}; refreshing route and retrying once",
            label, failed.endpoint, failed.error
        );
        let fresh = self.inner.provider.refresh(&route)?;
        self.prune(&fresh, &failed.endpoint);

        match self.attempt(label, &fresh, routing, pin, &op) {
            Ok(served) => Ok(served),
            Err(Attempt {
                error: TransportError::Response(message),
                ..
            }) => Err(CacheError::Store(message)),
            Err(Attempt { endpoint, error }) => {
                error!("{} on {} failed after retry: {}", label, endpoint, error);
                Err(CacheError::Connectivity {
                    endpoint: endpoint.to_string(),
                    message: error.to_string(),
                })
            }
        }
    }

    fn attempt<T>(
        &self,
        label: &str,
        route: &ResolvedRoute,
        routing: Routing,
        pin: Option<&Endpoint>,
        op: &impl Fn(&mut dyn StoreConnection) -> std::result::Result<T, TransportError>,
    ) -> std::result::Result<Served<T>, Attempt> {
        let (endpoint, pool) = self.pick(route, routing, pin);
        debug!("{} -> {}", label, endpoint);

        let mut entry = pool.acquire(&endpoint).map_err(|error| Attempt {
            endpoint: endpoint.clone(),
            error,
        })?;

        match op(entry.conn()) {
            Ok(value) => {
                pool.release(entry, true);
                Ok(Served {
                    value,
                    endpoint,
                    generation: route.generation,
                })
            }
            Err(error) => {
                let error = if endpoint == route.master {
                    error.on_master()
                } else {
                    error
                };
                pool.release(entry, !error.is_connection());
                Err(Attempt { endpoint, error })
            }
        }
    }

    fn pick(
        &self,
        route: &ResolvedRoute,
        routing: Routing,
        pin: Option<&Endpoint>,
    ) -> (Endpoint, &ConnectionPool) {
        let inner = &self.inner;
        if routing == Routing::Write || !inner.read_from_replicas || route.replicas.is_empty() {
            return (route.master.clone(), &inner.write_pool);
        }

        if let Some(pinned) = pin.filter(|p| route.replicas.contains(p)) {
            return (pinned.clone(), &inner.read_pool);
        }

        let index = match inner.replica_policy {
            ReplicaPolicy::RoundRobin => {
                inner.next_replica.fetch_add(1, Ordering::Relaxed) % route.replicas.len()
            }
            ReplicaPolicy::Random => rand::thread_rng().gen_range(0..route.replicas.len()),
        };
        (route.replicas[index].clone(), &inner.read_pool)
    }

    /// Forget idle connections that the refresh made useless
    fn prune(&self, fresh: &ResolvedRoute, failed: &Endpoint) {
        let keep = |endpoint: &Endpoint| endpoint != failed && fresh.contains(endpoint);
        self.inner.write_pool.retain(keep);
        self.inner.read_pool.retain(keep);
    }
}

/// Builds a client for a configuration
pub type ClientFactory = fn(&CacheConfig, Arc<dyn Connector>) -> Result<FailoverClient>;

/// Client classes selectable by name in [`CacheOptions::client_class`]
#[derive(Clone)]
pub struct ClientRegistry {
    factories: HashMap<String, ClientFactory>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("sentinel", sentinel_client);
        registry.register("direct", direct_client);
        registry
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a client class
    pub fn register(&mut self, name: impl Into<String>, factory: ClientFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Registered class names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate the client class named by the configuration
    pub fn build(
        &self,
        config: &CacheConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<FailoverClient> {
        let name = &config.options.client_class;
        let factory = self.factories.get(name).ok_or_else(|| {
            CacheError::Configuration(format!(
                "unknown client class '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        factory(config, connector)
    }
}

/// Master discovered through sentinels
pub fn sentinel_client(
    config: &CacheConfig,
    connector: Arc<dyn Connector>,
) -> Result<FailoverClient> {
    let mut topology = parse_sentinel_location(&config.location)?;
    if !config.key_prefix.is_empty() {
        topology.key_prefix = Some(config.key_prefix.clone());
    }

    let params = config.connect_params(topology.database);
    let key_prefix = topology.key_prefix.clone();
    let registry = SentinelRegistry::new(topology, Arc::clone(&connector), &params);
    Ok(FailoverClient::new(Arc::new(registry), connector, params, &config.options)
        .with_key_prefix(key_prefix))
}

/// Fixed master and replicas
pub fn direct_client(
    config: &CacheConfig,
    connector: Arc<dyn Connector>,
) -> Result<FailoverClient> {
    let topology = parse_direct_location(&config.location)?;
    let params = config.connect_params(topology.database);
    Ok(FailoverClient::new(
        Arc::new(StaticRoutes::new(&topology)),
        connector,
        params,
        &config.options,
    ))
}
