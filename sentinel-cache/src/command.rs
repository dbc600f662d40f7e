//! Primitive store commands and replies
//!
//! The cache layer only speaks this small command set. Transports translate
//! it to their wire format.

use crate::error::{CacheError, Result};

/// Expiry attached to a SET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// EX
    Seconds(u64),
    /// PX
    Millis(u64),
}

/// Write condition attached to a SET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// NX
    IfAbsent,
    /// XX
    IfExists,
}

/// Primitive command understood by every transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Get {
        key: String,
    },
    MGet {
        keys: Vec<String>,
    },
    Set {
        key: String,
        value: Vec<u8>,
        expiry: Option<Expiry>,
        condition: Option<SetCondition>,
    },
    Del {
        keys: Vec<String>,
    },
    Exists {
        keys: Vec<String>,
    },
    /// INCRBY that replies `Nil` instead of creating a missing key
    IncrByExisting {
        key: String,
        delta: i64,
    },
    Ttl {
        key: String,
    },
    Pttl {
        key: String,
    },
    Persist {
        key: String,
    },
    Expire {
        key: String,
        seconds: i64,
    },
    Scan {
        cursor: u64,
        pattern: String,
        count: usize,
    },
    FlushDb,
    /// Delete the key only while it still holds `expected`
    CompareAndDelete {
        key: String,
        expected: Vec<u8>,
    },
    SentinelMaster {
        service: String,
    },
    SentinelReplicas {
        service: String,
    },
}

impl Command {
    /// Command name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Get { .. } => "GET",
            Self::MGet { .. } => "MGET",
            Self::Set { .. } => "SET",
            Self::Del { .. } => "DEL",
            Self::Exists { .. } => "EXISTS",
            Self::IncrByExisting { .. } => "INCRBY",
            Self::Ttl { .. } => "TTL",
            Self::Pttl { .. } => "PTTL",
            Self::Persist { .. } => "PERSIST",
            Self::Expire { .. } => "EXPIRE",
            Self::Scan { .. } => "SCAN",
            Self::FlushDb => "FLUSHDB",
            Self::CompareAndDelete { .. } => "DELIFEQ",
            Self::SentinelMaster { .. } | Self::SentinelReplicas { .. } => "SENTINEL",
        }
    }

    /// Whether the command mutates the keyspace
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Set { .. }
                | Self::Del { .. }
                | Self::IncrByExisting { .. }
                | Self::Persist { .. }
                | Self::Expire { .. }
                | Self::FlushDb
                | Self::CompareAndDelete { .. }
        )
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    pub fn del(keys: Vec<String>) -> Self {
        Self::Del { keys }
    }

    pub fn set(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self::Set {
            key: key.into(),
            value,
            expiry: None,
            condition: None,
        }
    }
}

/// Reply to a primitive command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Bytes(Vec<u8>),
    Status(String),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Interpret as an integer reply
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Bytes(b) => std::str::from_utf8(b)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| unexpected("integer", self)),
            Self::Status(s) => s.parse().map_err(|_| unexpected("integer", self)),
            _ => Err(unexpected("integer", self)),
        }
    }

    /// Interpret as an optional bulk string
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Nil => Ok(None),
            Self::Bytes(b) => Ok(Some(b)),
            Self::Status(s) => Ok(Some(s.into_bytes())),
            Self::Int(n) => Ok(Some(n.to_string().into_bytes())),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    /// Interpret as a UTF-8 string
    pub fn into_string(self) -> Result<String> {
        let description = format!("{:?}", self);
        self.into_bytes()?
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or_else(|| CacheError::Store(format!("expected string reply, got {}", description)))
    }

    /// Interpret as an array reply
    pub fn into_array(self) -> Result<Vec<Reply>> {
        match self {
            Self::Array(items) => Ok(items),
            Self::Nil => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Whether a SET-style reply signals that the write happened
    pub fn is_ok(&self) -> bool {
        match self {
            Self::Status(s) => s.eq_ignore_ascii_case("OK"),
            Self::Int(n) => *n > 0,
            _ => false,
        }
    }
}

fn unexpected(expected: &str, reply: &Reply) -> CacheError {
    CacheError::Store(format!("expected {} reply, got {:?}", expected, reply))
}
