//! In-process store backend
//!
//! [`MemoryCluster`] models one sentinel-managed service: sentinel nodes, a
//! master, read-only replicas and the keyspaces they serve. Replication is
//! instantaneous (all data nodes share the keyspaces), so a failover never
//! loses acknowledged writes. Nodes can be taken down, restarted and failed
//! over at runtime, which makes the failover paths of the client testable
//! without a server.
//!
//! ```
//! use sentinel_cache::memory::MemoryCluster;
//! use sentinel_cache::types::Endpoint;
//!
//! let cluster = MemoryCluster::new("mymaster")
//!     .with_sentinel(Endpoint::new("sentinel-1", 26379))
//!     .with_master(Endpoint::new("redis-1", 6379))
//!     .with_replica(Endpoint::new("redis-2", 6379));
//!
//! assert_eq!(
//!     cluster.sentinel_location(0),
//!     "mymaster/sentinel-1:26379/0"
//! );
//! ```

use crate::command::{Command, Expiry, Reply, SetCondition};
use crate::glob::glob_match;
use crate::transport::{ConnectParams, Connector, StoreConnection, TransportError};
use crate::types::Endpoint;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Stored value with expiry metadata
#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Option<Instant>,
    /// Insertion sequence, used as the SCAN cursor
    seq: u64,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Remaining TTL in seconds, rounded like the server does
    fn remaining_ttl_secs(&self) -> Option<i64> {
        self.expires_at.map(|at| {
            let remaining = at.saturating_duration_since(Instant::now()).as_millis() as i64;
            (remaining + 500) / 1000
        })
    }

    fn remaining_ttl_millis(&self) -> Option<i64> {
        self.expires_at.map(|at| {
            i64::try_from(at.saturating_duration_since(Instant::now()).as_millis())
                .unwrap_or(i64::MAX)
        })
    }
}

/// Expiry instant for a relative TTL. `None` when the TTL is zero or the
/// absolute unix time in milliseconds would not fit an `i64`.
fn deadline(ttl: Duration) -> Option<Instant> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    if ttl.is_zero() || now_ms + ttl.as_millis() > i64::MAX as u128 {
        return None;
    }
    Instant::now().checked_add(ttl)
}

/// One logical database
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, StoredValue>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Keyspace {
    /// Live entry for `key`; expired entries are purged on access
    fn live(&mut self, key: &str) -> Option<&mut StoredValue> {
        if self.entries.get(key).is_some_and(StoredValue::is_expired) {
            self.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: &str, data: Vec<u8>, expires_at: Option<Instant>) {
        if let Some(existing) = self.live(key) {
            existing.data = data;
            existing.expires_at = expires_at;
            return;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.order.insert(seq, key.to_string());
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data,
                expires_at,
                seq,
            },
        );
    }

    /// Remove a key; true if a live entry was removed
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(value) => {
                self.order.remove(&value.seq);
                !value.is_expired()
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.entries.values().filter(|v| !v.is_expired()).count()
    }

    fn apply(&mut self, command: &Command) -> Result<Reply, TransportError> {
        match command {
            Command::Ping => Ok(Reply::Status("PONG".to_string())),
            Command::Get { key } => Ok(self
                .live(key)
                .map(|v| Reply::Bytes(v.data.clone()))
                .unwrap_or(Reply::Nil)),
            Command::MGet { keys } => Ok(Reply::Array(
                keys.iter()
                    .map(|key| {
                        self.live(key)
                            .map(|v| Reply::Bytes(v.data.clone()))
                            .unwrap_or(Reply::Nil)
                    })
                    .collect(),
            )),
            Command::Set {
                key,
                value,
                expiry,
                condition,
            } => {
                let exists = self.live(key).is_some();
                match condition {
                    Some(SetCondition::IfAbsent) if exists => return Ok(Reply::Nil),
                    Some(SetCondition::IfExists) if !exists => return Ok(Reply::Nil),
                    _ => {}
                }

                let ttl = match expiry {
                    Some(Expiry::Seconds(secs)) => Some(Duration::from_secs(*secs)),
                    Some(Expiry::Millis(ms)) => Some(Duration::from_millis(*ms)),
                    None => None,
                };
                let expires_at = match ttl {
                    None => None,
                    Some(ttl) => Some(deadline(ttl).ok_or_else(|| {
                        TransportError::Response(
                            "ERR invalid expire time in 'set' command".to_string(),
                        )
                    })?),
                };

                self.insert(key, value.clone(), expires_at);
                Ok(Reply::Status("OK".to_string()))
            }
            Command::Del { keys } => {
                let removed = keys.iter().filter(|key| self.remove(key)).count();
                Ok(Reply::Int(removed as i64))
            }
            Command::Exists { keys } => {
                let found = keys.iter().filter(|key| self.live(key).is_some()).count();
                Ok(Reply::Int(found as i64))
            }
            Command::IncrByExisting { key, delta } => {
                let Some(entry) = self.live(key) else {
                    return Ok(Reply::Nil);
                };

                let current = std::str::from_utf8(&entry.data)
                    .ok()
                    .and_then(|s| s.parse::<i64>().ok())
                    .ok_or_else(|| {
                        TransportError::Response(
                            "ERR value is not an integer or out of range".to_string(),
                        )
                    })?;

                let updated = current.checked_add(*delta).ok_or_else(|| {
                    TransportError::Response(
                        "ERR increment or decrement would overflow".to_string(),
                    )
                })?;

                entry.data = updated.to_string().into_bytes();
                Ok(Reply::Int(updated))
            }
            Command::Ttl { key } => Ok(Reply::Int(match self.live(key) {
                None => -2,
                Some(value) => value.remaining_ttl_secs().unwrap_or(-1),
            })),
            Command::Pttl { key } => Ok(Reply::Int(match self.live(key) {
                None => -2,
                Some(value) => value.remaining_ttl_millis().unwrap_or(-1),
            })),
            Command::Persist { key } => Ok(Reply::Int(match self.live(key) {
                Some(value) if value.expires_at.is_some() => {
                    value.expires_at = None;
                    1
                }
                _ => 0,
            })),
            Command::Expire { key, seconds } => {
                if self.live(key).is_none() {
                    return Ok(Reply::Int(0));
                }
                if *seconds <= 0 {
                    self.remove(key);
                } else {
                    let expires_at = deadline(Duration::from_secs(*seconds as u64)).ok_or_else(|| {
                        TransportError::Response(
                            "ERR invalid expire time in 'expire' command".to_string(),
                        )
                    })?;
                    if let Some(value) = self.live(key) {
                        value.expires_at = Some(expires_at);
                    }
                }
                Ok(Reply::Int(1))
            }
            Command::Scan {
                cursor,
                pattern,
                count,
            } => {
                let mut matched = Vec::new();
                let mut last_seen = None;
                let mut examined = 0;

                for (seq, key) in self.order.range(cursor.saturating_add(1)..) {
                    if examined == (*count).max(1) {
                        break;
                    }
                    examined += 1;
                    last_seen = Some(*seq);

                    let live = self.entries.get(key).is_some_and(|v| !v.is_expired());
                    if live && glob_match(pattern, key) {
                        matched.push(Reply::Bytes(key.clone().into_bytes()));
                    }
                }

                let exhausted = match last_seen {
                    Some(seq) => self.order.range(seq + 1..).next().is_none(),
                    None => true,
                };
                let next = if exhausted { 0 } else { last_seen.unwrap_or(0) };

                Ok(Reply::Array(vec![
                    Reply::Bytes(next.to_string().into_bytes()),
                    Reply::Array(matched),
                ]))
            }
            Command::FlushDb => {
                self.entries.clear();
                self.order.clear();
                Ok(Reply::Status("OK".to_string()))
            }
            Command::CompareAndDelete { key, expected } => {
                let matches = self.live(key).is_some_and(|v| &v.data == expected);
                if matches {
                    self.remove(key);
                }
                Ok(Reply::Int(matches as i64))
            }
            Command::SentinelMaster { .. } | Command::SentinelReplicas { .. } => Err(
                TransportError::Response("ERR unknown command 'SENTINEL'".to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Master,
    Replica,
    Sentinel,
}

#[derive(Debug, Clone)]
struct Node {
    role: Role,
    up: bool,
    /// Bumped whenever the node drops its clients
    incarnation: u64,
    connections: u64,
    commands: u64,
}

impl Node {
    fn new(role: Role) -> Self {
        Self {
            role,
            up: true,
            incarnation: 0,
            connections: 0,
            commands: 0,
        }
    }
}

#[derive(Debug)]
struct ClusterState {
    service: String,
    nodes: HashMap<Endpoint, Node>,
    sentinels: Vec<Endpoint>,
    master: Option<Endpoint>,
    databases: HashMap<i64, Keyspace>,
}

impl ClusterState {
    fn replicas(&self) -> Vec<Endpoint> {
        let mut replicas: Vec<Endpoint> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.role == Role::Replica)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        replicas.sort();
        replicas
    }

    fn sentinel_reply(&self, command: &Command) -> Result<Reply, TransportError> {
        match command {
            Command::Ping => Ok(Reply::Status("PONG".to_string())),
            Command::SentinelMaster { service } => {
                if service != &self.service {
                    return Ok(Reply::Nil);
                }
                Ok(match &self.master {
                    Some(master) => Reply::Array(vec![
                        Reply::Bytes(master.host.clone().into_bytes()),
                        Reply::Bytes(master.port.to_string().into_bytes()),
                    ]),
                    None => Reply::Nil,
                })
            }
            Command::SentinelReplicas { service } => {
                if service != &self.service {
                    return Err(TransportError::Response(
                        "ERR No such master with that name".to_string(),
                    ));
                }
                let replicas = self
                    .replicas()
                    .into_iter()
                    .map(|endpoint| {
                        let up = self.nodes.get(&endpoint).is_some_and(|n| n.up);
                        let flags = if up { "slave" } else { "slave,s_down,disconnected" };
                        Reply::Array(
                            [
                                ("name", endpoint.to_string()),
                                ("ip", endpoint.host.clone()),
                                ("port", endpoint.port.to_string()),
                                ("flags", flags.to_string()),
                            ]
                            .into_iter()
                            .flat_map(|(k, v)| {
                                [
                                    Reply::Bytes(k.as_bytes().to_vec()),
                                    Reply::Bytes(v.into_bytes()),
                                ]
                            })
                            .collect(),
                        )
                    })
                    .collect();
                Ok(Reply::Array(replicas))
            }
            other => Err(TransportError::Response(format!(
                "ERR unknown command '{}'",
                other.name()
            ))),
        }
    }
}

/// In-process sentinel-managed service
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    /// Create an empty cluster for the given service name
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState {
                service: service.into(),
                nodes: HashMap::new(),
                sentinels: Vec::new(),
                master: None,
                databases: HashMap::new(),
            })),
        }
    }

    pub fn with_sentinel(self, endpoint: Endpoint) -> Self {
        {
            let mut state = self.state.lock();
            state.nodes.insert(endpoint.clone(), Node::new(Role::Sentinel));
            state.sentinels.push(endpoint);
        }
        self
    }

    pub fn with_master(self, endpoint: Endpoint) -> Self {
        {
            let mut state = self.state.lock();
            if let Some(old) = state.master.take() {
                if let Some(node) = state.nodes.get_mut(&old) {
                    node.role = Role::Replica;
                }
            }
            state.nodes.insert(endpoint.clone(), Node::new(Role::Master));
            state.master = Some(endpoint);
        }
        self
    }

    pub fn with_replica(self, endpoint: Endpoint) -> Self {
        self.state
            .lock()
            .nodes
            .insert(endpoint, Node::new(Role::Replica));
        self
    }

    /// Sentinel connection descriptor for this cluster
    pub fn sentinel_location(&self, database: i64) -> String {
        let state = self.state.lock();
        state
            .sentinels
            .iter()
            .map(|s| format!("{}/{}/{}", state.service, s, database))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Master currently reported by the sentinels
    pub fn master(&self) -> Option<Endpoint> {
        self.state.lock().master.clone()
    }

    pub fn replicas(&self) -> Vec<Endpoint> {
        self.state.lock().replicas()
    }

    /// Stop a node; open connections to it fail from now on
    pub fn take_down(&self, endpoint: &Endpoint) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(endpoint) {
            node.up = false;
            node.incarnation += 1;
            debug!("Memory node {} taken down", endpoint);
        }
    }

    /// Restart a stopped node
    pub fn bring_up(&self, endpoint: &Endpoint) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(endpoint) {
            node.up = true;
            debug!("Memory node {} back up", endpoint);
        }
    }

    /// Promote `replica` to master. The old master becomes a replica and
    /// drops all of its client connections.
    pub fn failover_to(&self, replica: &Endpoint) -> bool {
        let mut state = self.state.lock();
        if state.nodes.get(replica).map(|n| n.role) != Some(Role::Replica) {
            return false;
        }

        if let Some(old) = state.master.take() {
            if let Some(node) = state.nodes.get_mut(&old) {
                node.role = Role::Replica;
                node.incarnation += 1;
            }
        }

        if let Some(node) = state.nodes.get_mut(replica) {
            node.role = Role::Master;
            node.incarnation += 1;
        }
        state.master = Some(replica.clone());
        debug!("Memory cluster failed over to {}", replica);
        true
    }

    /// Make the sentinels forget the master
    pub fn clear_master(&self) {
        self.state.lock().master = None;
    }

    /// Commands served by a node since creation
    pub fn commands_served(&self, endpoint: &Endpoint) -> u64 {
        self.state
            .lock()
            .nodes
            .get(endpoint)
            .map(|n| n.commands)
            .unwrap_or(0)
    }

    /// Connections opened to a node since creation
    pub fn connections_opened(&self, endpoint: &Endpoint) -> u64 {
        self.state
            .lock()
            .nodes
            .get(endpoint)
            .map(|n| n.connections)
            .unwrap_or(0)
    }

    /// Commands answered by all sentinels together
    pub fn sentinel_queries(&self) -> u64 {
        let state = self.state.lock();
        state
            .sentinels
            .iter()
            .filter_map(|s| state.nodes.get(s))
            .map(|n| n.commands)
            .sum()
    }

    /// Number of live keys in a database
    pub fn key_count(&self, database: i64) -> usize {
        self.state
            .lock()
            .databases
            .get(&database)
            .map(Keyspace::len)
            .unwrap_or(0)
    }

    /// Raw stored bytes, bypassing any node
    pub fn raw_get(&self, database: i64, key: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .databases
            .get_mut(&database)
            .and_then(|ks| ks.live(key).map(|v| v.data.clone()))
    }
}

impl Connector for MemoryCluster {
    fn connect(
        &self,
        endpoint: &Endpoint,
        params: &ConnectParams,
    ) -> Result<Box<dyn StoreConnection>, TransportError> {
        let mut state = self.state.lock();
        let node = match state.nodes.get_mut(endpoint) {
            Some(node) if node.up => node,
            _ => {
                return Err(TransportError::Connection(format!(
                    "connection refused: {}",
                    endpoint
                )));
            }
        };

        node.connections += 1;
        debug!("Memory connection opened to {} (db={})", endpoint, params.database);

        Ok(Box::new(MemoryConnection {
            cluster: self.clone(),
            endpoint: endpoint.clone(),
            database: params.database,
            incarnation: node.incarnation,
        }))
    }
}

struct MemoryConnection {
    cluster: MemoryCluster,
    endpoint: Endpoint,
    database: i64,
    incarnation: u64,
}

impl StoreConnection for MemoryConnection {
    fn execute(&mut self, command: &Command) -> Result<Reply, TransportError> {
        let mut guard = self.cluster.state.lock();
        let state = &mut *guard;

        let role = match state.nodes.get_mut(&self.endpoint) {
            Some(node) if node.up && node.incarnation == self.incarnation => {
                node.commands += 1;
                node.role
            }
            _ => {
                return Err(TransportError::Connection(format!(
                    "connection reset by peer: {}",
                    self.endpoint
                )));
            }
        };

        match role {
            Role::Sentinel => state.sentinel_reply(command),
            Role::Replica if command.is_write() => Err(TransportError::Response(
                "READONLY You can't write against a read only replica.".to_string(),
            )),
            Role::Master | Role::Replica => state
                .databases
                .entry(self.database)
                .or_default()
                .apply(command),
        }
    }
}
