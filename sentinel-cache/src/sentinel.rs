//! Sentinel registry - resolves which node currently masters a service
//!
//! Sentinels are asked in configured order; the first one that answers is
//! trusted. The resolved route is cached and replaced as a whole, and a
//! refresh only happens reactively, after a command hit a connection
//! failure.

use crate::command::{Command, Reply};
use crate::error::{CacheError, Result};
use crate::transport::{ConnectParams, Connector, TransportError};
use crate::types::{DirectTopology, Endpoint, ResolvedRoute, ServiceTopology};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Replica flags that disqualify a replica from serving reads
const UNHEALTHY_FLAGS: [&str; 3] = ["s_down", "o_down", "disconnected"];

/// Source of the current master/replica route
pub trait RouteProvider: Send + Sync {
    /// Cached route; resolves synchronously when nothing is cached yet
    fn current(&self) -> Result<Arc<ResolvedRoute>>;

    /// Re-resolve because a command failed against `stale`.
    ///
    /// Callers reporting the same stale generation share one resolution.
    fn refresh(&self, stale: &ResolvedRoute) -> Result<Arc<ResolvedRoute>>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// Route provider backed by a sentinel quorum
pub struct SentinelRegistry {
    topology: ServiceTopology,
    connector: Arc<dyn Connector>,
    params: ConnectParams,
    route: RwLock<Option<Arc<ResolvedRoute>>>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    resolutions: AtomicU64,
}

impl SentinelRegistry {
    pub fn new(
        topology: ServiceTopology,
        connector: Arc<dyn Connector>,
        params: &ConnectParams,
    ) -> Self {
        Self {
            topology,
            connector,
            params: params.for_sentinel(),
            route: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            resolutions: AtomicU64::new(0),
        }
    }

    pub fn topology(&self) -> &ServiceTopology {
        &self.topology
    }

    /// Route currently cached, if any
    pub fn cached(&self) -> Option<Arc<ResolvedRoute>> {
        self.route.read().clone()
    }

    /// Number of successful sentinel resolutions so far
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }

    /// Ask the sentinels for the master and replicas and cache the answer
    pub fn resolve(&self) -> Result<Arc<ResolvedRoute>> {
        let service = &self.topology.service_name;
        let mut failures = Vec::new();

        for sentinel in &self.topology.sentinels {
            match self.query(sentinel) {
                Ok(Some((master, replicas))) => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let route = Arc::new(ResolvedRoute::new(master, replicas, generation));
                    *self.route.write() = Some(Arc::clone(&route));
                    self.resolutions.fetch_add(1, Ordering::Relaxed);

                    info!(
                        service = %service,
                        sentinel = %sentinel,
                        master = %route.master,
                        replicas = route.replicas.len(),
                        generation,
                        "Resolved master"
                    );
                    return Ok(route);
                }
                Ok(None) => {
                    warn!("Sentinel {} knows no master for '{}'", sentinel, service);
                    failures.push(format!("{}: no master reported", sentinel));
                }
                Err(e) => {
                    warn!("Sentinel {} unavailable: {}", sentinel, e);
                    failures.push(format!("{}: {}", sentinel, e));
                }
            }
        }

        let reason = if failures.is_empty() {
            "no sentinels configured".to_string()
        } else {
            failures.join("; ")
        };

        Err(CacheError::Discovery {
            service: service.clone(),
            reason,
        })
    }

    fn query(
        &self,
        sentinel: &Endpoint,
    ) -> std::result::Result<Option<(Endpoint, Vec<Endpoint>)>, TransportError> {
        let service = self.topology.service_name.clone();
        let mut conn = self.connector.connect(sentinel, &self.params)?;

        let master = conn.execute(&Command::SentinelMaster {
            service: service.clone(),
        })?;
        let Some(master) = parse_master(master)? else {
            return Ok(None);
        };

        let replicas = conn.execute(&Command::SentinelReplicas { service })?;
        Ok(Some((master, parse_replicas(replicas))))
    }
}

impl RouteProvider for SentinelRegistry {
    fn current(&self) -> Result<Arc<ResolvedRoute>> {
        if let Some(route) = self.cached() {
            return Ok(route);
        }

        let _guard = self.refresh_lock.lock();
        match self.cached() {
            Some(route) => Ok(route),
            None => self.resolve(),
        }
    }

    fn refresh(&self, stale: &ResolvedRoute) -> Result<Arc<ResolvedRoute>> {
        let _guard = self.refresh_lock.lock();

        if let Some(current) = self.cached() {
            if current.generation != stale.generation {
                debug!(
                    "Route already refreshed (generation {} -> {})",
                    stale.generation, current.generation
                );
                return Ok(current);
            }
        }

        warn!(
            "Re-resolving master for '{}' after failure on {}",
            self.topology.service_name, stale.master
        );
        self.resolve()
    }

    fn describe(&self) -> String {
        let sentinels: Vec<String> = self
            .topology
            .sentinels
            .iter()
            .map(ToString::to_string)
            .collect();
        format!(
            "sentinel service '{}' via [{}] db={}",
            self.topology.service_name,
            sentinels.join(", "),
            self.topology.database
        )
    }
}

/// Fixed master and replicas, never re-resolved
pub struct StaticRoutes {
    route: Arc<ResolvedRoute>,
}

impl StaticRoutes {
    pub fn new(topology: &DirectTopology) -> Self {
        Self {
            route: Arc::new(ResolvedRoute::new(
                topology.master.clone(),
                topology.replicas.clone(),
                1,
            )),
        }
    }
}

impl RouteProvider for StaticRoutes {
    fn current(&self) -> Result<Arc<ResolvedRoute>> {
        Ok(Arc::clone(&self.route))
    }

    fn refresh(&self, _stale: &ResolvedRoute) -> Result<Arc<ResolvedRoute>> {
        Ok(Arc::clone(&self.route))
    }

    fn describe(&self) -> String {
        format!(
            "direct master {} with {} replica(s)",
            self.route.master,
            self.route.replicas.len()
        )
    }
}

/// `[host, port]` or nil
fn parse_master(reply: Reply) -> std::result::Result<Option<Endpoint>, TransportError> {
    if reply.is_nil() {
        return Ok(None);
    }

    let malformed = || TransportError::Response(format!("malformed master reply: {:?}", reply));
    let items = match &reply {
        Reply::Array(items) if items.len() >= 2 => items,
        _ => return Err(malformed()),
    };

    let host = reply_text(&items[0]).ok_or_else(malformed)?;
    let port = reply_text(&items[1])
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(malformed)?;

    Ok(Some(Endpoint::new(host, port)))
}

/// Array of flat field/value arrays; unhealthy or malformed entries are skipped
fn parse_replicas(reply: Reply) -> Vec<Endpoint> {
    let Reply::Array(entries) = reply else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let Reply::Array(fields) = entry else {
                return None;
            };

            let info: HashMap<String, String> = fields
                .chunks(2)
                .filter_map(|pair| match pair {
                    [k, v] => Some((reply_text(k)?, reply_text(v)?)),
                    _ => None,
                })
                .collect();

            let flags = info.get("flags").map(String::as_str).unwrap_or("");
            if flags
                .split(',')
                .any(|flag| UNHEALTHY_FLAGS.contains(&flag))
            {
                debug!("Skipping unhealthy replica {:?} (flags={})", info.get("name"), flags);
                return None;
            }

            let host = info.get("ip")?;
            let port = info.get("port")?.parse::<u16>().ok()?;
            Some(Endpoint::new(host.clone(), port))
        })
        .collect()
}

fn reply_text(reply: &Reply) -> Option<String> {
    match reply {
        Reply::Bytes(b) => String::from_utf8(b.clone()).ok(),
        Reply::Status(s) => Some(s.clone()),
        Reply::Int(n) => Some(n.to_string()),
        _ => None,
    }
}
