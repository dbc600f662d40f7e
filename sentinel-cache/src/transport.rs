//! Connections to store and sentinel nodes
//!
//! [`Connector`] opens connections and [`StoreConnection`] runs primitive
//! commands on them. [`RedisConnector`] talks to real servers through the
//! `redis` crate; [`crate::memory::MemoryCluster`] serves the same traits
//! in-process.

use crate::command::{Command, Expiry, Reply, SetCondition};
use crate::types::Endpoint;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Increment only when the key already exists
const INCR_IF_EXISTS_SCRIPT: &str = "if redis.call('exists', KEYS[1]) == 1 then return redis.call('incrby', KEYS[1], ARGV[1]) else return nil end";

/// Delete only while the key still holds the caller's token
const DELETE_IF_EQUALS_SCRIPT: &str = "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

/// Transport-level failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Refused, reset, dropped or timed out. Worth a failover retry.
    #[error("connection error: {0}")]
    Connection(String),

    /// The node answered with an error reply
    #[error("{0}")]
    Response(String),
}

impl TransportError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether the node refused a write because it is a replica
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Response(message) if message.starts_with("READONLY"))
    }

    /// Reinterpret an error from a node the route names as master. A
    /// READONLY reply there means the node was demoted, so the route is
    /// stale in the same way as after a dropped connection.
    pub fn on_master(self) -> Self {
        if self.is_read_only() {
            Self::Connection(self.to_string())
        } else {
            self
        }
    }
}

/// Per-connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub database: i64,
    pub password: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub socket_timeout: Option<Duration>,
}

impl ConnectParams {
    /// Settings for a sentinel node: database 0, no password, same timeouts
    pub fn for_sentinel(&self) -> Self {
        Self {
            database: 0,
            password: None,
            connect_timeout: self.connect_timeout,
            socket_timeout: self.socket_timeout,
        }
    }
}

/// A live connection, owned by one caller at a time
pub trait StoreConnection: Send {
    fn execute(&mut self, command: &Command) -> Result<Reply, TransportError>;

    /// Send several commands over this connection in order
    fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<Reply>, TransportError> {
        commands.iter().map(|c| self.execute(c)).collect()
    }
}

/// Opens connections to endpoints
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        params: &ConnectParams,
    ) -> Result<Box<dyn StoreConnection>, TransportError>;
}

/// Connector backed by the `redis` crate's synchronous connections
#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for RedisConnector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        params: &ConnectParams,
    ) -> Result<Box<dyn StoreConnection>, TransportError> {
        let url = connection_url(endpoint, params)?;
        let client = redis::Client::open(url.as_str()).map_err(classify)?;

        let conn = match params.connect_timeout {
            Some(timeout) => client.get_connection_with_timeout(timeout),
            None => client.get_connection(),
        }
        .map_err(classify)?;

        conn.set_read_timeout(params.socket_timeout)
            .map_err(classify)?;
        conn.set_write_timeout(params.socket_timeout)
            .map_err(classify)?;

        debug!("Connected to {} (db={})", endpoint, params.database);

        Ok(Box::new(RedisConnection { conn }))
    }
}

struct RedisConnection {
    conn: redis::Connection,
}

impl StoreConnection for RedisConnection {
    fn execute(&mut self, command: &Command) -> Result<Reply, TransportError> {
        let value = to_cmd(command)
            .query::<redis::Value>(&mut self.conn)
            .map_err(classify)?;
        Ok(from_value(value))
    }

    fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<Reply>, TransportError> {
        let mut pipe = redis::pipe();
        for command in commands {
            pipe.add_command(to_cmd(command));
        }

        let values = pipe
            .query::<Vec<redis::Value>>(&mut self.conn)
            .map_err(classify)?;
        Ok(values.into_iter().map(from_value).collect())
    }
}

fn connection_url(endpoint: &Endpoint, params: &ConnectParams) -> Result<Url, TransportError> {
    let mut url = Url::parse(&format!("redis://{}/{}", endpoint, params.database))
        .map_err(|e| TransportError::Connection(format!("invalid address {}: {}", endpoint, e)))?;

    if let Some(password) = &params.password {
        url.set_password(Some(password))
            .map_err(|_| TransportError::Connection(format!("cannot use password for {}", endpoint)))?;
    }

    Ok(url)
}

fn to_cmd(command: &Command) -> redis::Cmd {
    match command {
        Command::Ping => redis::cmd("PING"),
        Command::Get { key } => {
            let mut cmd = redis::cmd("GET");
            cmd.arg(key);
            cmd
        }
        Command::MGet { keys } => {
            let mut cmd = redis::cmd("MGET");
            cmd.arg(keys);
            cmd
        }
        Command::Set {
            key,
            value,
            expiry,
            condition,
        } => {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value.as_slice());
            match expiry {
                Some(Expiry::Seconds(secs)) => {
                    cmd.arg("EX").arg(*secs);
                }
                Some(Expiry::Millis(ms)) => {
                    cmd.arg("PX").arg(*ms);
                }
                None => {}
            }
            match condition {
                Some(SetCondition::IfAbsent) => {
                    cmd.arg("NX");
                }
                Some(SetCondition::IfExists) => {
                    cmd.arg("XX");
                }
                None => {}
            }
            cmd
        }
        Command::Del { keys } => {
            let mut cmd = redis::cmd("DEL");
            cmd.arg(keys);
            cmd
        }
        Command::Exists { keys } => {
            let mut cmd = redis::cmd("EXISTS");
            cmd.arg(keys);
            cmd
        }
        Command::IncrByExisting { key, delta } => {
            let mut cmd = redis::cmd("EVAL");
            cmd.arg(INCR_IF_EXISTS_SCRIPT).arg(1).arg(key).arg(*delta);
            cmd
        }
        Command::Ttl { key } => {
            let mut cmd = redis::cmd("TTL");
            cmd.arg(key);
            cmd
        }
        Command::Pttl { key } => {
            let mut cmd = redis::cmd("PTTL");
            cmd.arg(key);
            cmd
        }
        Command::Persist { key } => {
            let mut cmd = redis::cmd("PERSIST");
            cmd.arg(key);
            cmd
        }
        Command::Expire { key, seconds } => {
            let mut cmd = redis::cmd("EXPIRE");
            cmd.arg(key).arg(*seconds);
            cmd
        }
        Command::Scan {
            cursor,
            pattern,
            count,
        } => {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(*cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(*count);
            cmd
        }
        Command::FlushDb => redis::cmd("FLUSHDB"),
        Command::CompareAndDelete { key, expected } => {
            let mut cmd = redis::cmd("EVAL");
            cmd.arg(DELETE_IF_EQUALS_SCRIPT)
                .arg(1)
                .arg(key)
                .arg(expected.as_slice());
            cmd
        }
        Command::SentinelMaster { service } => {
            let mut cmd = redis::cmd("SENTINEL");
            cmd.arg("get-master-addr-by-name").arg(service);
            cmd
        }
        Command::SentinelReplicas { service } => {
            let mut cmd = redis::cmd("SENTINEL");
            cmd.arg("replicas").arg(service);
            cmd
        }
    }
}

fn from_value(value: redis::Value) -> Reply {
    match value {
        redis::Value::Nil => Reply::Nil,
        redis::Value::Int(n) => Reply::Int(n),
        redis::Value::BulkString(bytes) => Reply::Bytes(bytes),
        redis::Value::SimpleString(s) => Reply::Status(s),
        redis::Value::Okay => Reply::Status("OK".to_string()),
        redis::Value::Array(items) | redis::Value::Set(items) => {
            Reply::Array(items.into_iter().map(from_value).collect())
        }
        other => Reply::Status(format!("{:?}", other)),
    }
}

fn classify(err: redis::RedisError) -> TransportError {
    if err.kind() == redis::ErrorKind::ReadOnly {
        return TransportError::Response(format!("READONLY {}", err.detail().unwrap_or_default()));
    }
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Response(err.to_string())
    }
}
