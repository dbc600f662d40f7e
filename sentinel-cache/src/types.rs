//! Common types for the sentinel cache client

use crate::error::CacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network address of a store or sentinel node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CacheError::Configuration(format!("missing port in '{}'", s)))?;

        if host.is_empty() {
            return Err(CacheError::Configuration(format!("missing host in '{}'", s)));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| CacheError::Configuration(format!("invalid port in '{}'", s)))?;

        Ok(Self::new(host, port))
    }
}

/// Sentinel-managed service described by a connection descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTopology {
    /// Service (master group) name known to the sentinels
    pub service_name: String,
    /// Sentinels, queried in this order
    pub sentinels: Vec<Endpoint>,
    /// Logical database index on the data nodes
    pub database: i64,
    /// Optional key prefix applied by the cache layer
    pub key_prefix: Option<String>,
}

/// Statically configured master plus read replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectTopology {
    pub master: Endpoint,
    pub replicas: Vec<Endpoint>,
    pub database: i64,
}

/// Master and replicas currently serving the service.
///
/// Replaced as a whole on every refresh; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub master: Endpoint,
    pub replicas: Vec<Endpoint>,
    pub resolved_at: DateTime<Utc>,
    /// Incremented on every successful resolution
    pub generation: u64,
}

impl ResolvedRoute {
    pub fn new(master: Endpoint, mut replicas: Vec<Endpoint>, generation: u64) -> Self {
        replicas.sort();
        replicas.dedup();
        replicas.retain(|r| r != &master);

        Self {
            master,
            replicas,
            resolved_at: Utc::now(),
            generation,
        }
    }

    /// Whether the endpoint is part of this route
    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        &self.master == endpoint || self.replicas.contains(endpoint)
    }
}

/// Which node class a command must be sent to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Master only
    Write,
    /// A replica when replica reads are enabled, else the master
    Read,
}
