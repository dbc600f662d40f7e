//! Cache configuration
//!
//! Loaded from YAML or assembled with the `with_*` builders:
//!
//! ```yaml
//! location: "mymaster/10.0.0.1:26379/0,mymaster/10.0.0.2:26379/0"
//! key_prefix: "app"
//! default_timeout_secs: 300
//! options:
//!   read_from_replicas: true
//!   compressor: zstd
//! ```

use crate::error::{CacheError, Result};
use crate::transport::ConnectParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Value serializer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Json,
    #[serde(alias = "messagepack")]
    MsgPack,
}

/// Value compression
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressorKind {
    #[default]
    None,
    Lz4,
    Zstd,
}

/// How reads pick a replica
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaPolicy {
    #[default]
    RoundRobin,
    Random,
}

/// Client options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Name registered in the [`crate::client::ClientRegistry`]
    pub client_class: String,
    pub serializer: SerializerKind,
    pub compressor: CompressorKind,
    /// Values shorter than this are never compressed
    pub compress_min_length: usize,
    pub zstd_level: i32,
    pub socket_timeout_ms: Option<u64>,
    pub socket_connect_timeout_ms: Option<u64>,
    pub read_from_replicas: bool,
    pub replica_policy: ReplicaPolicy,
    pub password: Option<String>,
    pub max_idle_per_endpoint: usize,
    /// SCAN batch hint when the caller gives none
    pub scan_count: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            client_class: "sentinel".to_string(),
            serializer: SerializerKind::Json,
            compressor: CompressorKind::None,
            compress_min_length: 15,
            zstd_level: 3,
            socket_timeout_ms: None,
            socket_connect_timeout_ms: None,
            read_from_replicas: false,
            replica_policy: ReplicaPolicy::RoundRobin,
            password: None,
            max_idle_per_endpoint: 16,
            scan_count: 100,
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Connection descriptor
    pub location: String,
    pub key_prefix: String,
    /// Version used when a call passes none
    pub version: i64,
    /// Expiry for `Timeout::Default`; `None` keeps values forever
    pub default_timeout_secs: Option<u64>,
    pub options: CacheOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            key_prefix: String::new(),
            version: 1,
            default_timeout_secs: Some(300),
            options: CacheOptions::default(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration for the given connection descriptor
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| CacheError::Configuration(format!("invalid configuration: {}", e)))
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn with_default_timeout(mut self, secs: Option<u64>) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn with_client_class(mut self, name: impl Into<String>) -> Self {
        self.options.client_class = name.into();
        self
    }

    pub fn with_read_from_replicas(mut self, enabled: bool) -> Self {
        self.options.read_from_replicas = enabled;
        self
    }

    pub fn with_replica_policy(mut self, policy: ReplicaPolicy) -> Self {
        self.options.replica_policy = policy;
        self
    }

    pub fn with_serializer(mut self, serializer: SerializerKind) -> Self {
        self.options.serializer = serializer;
        self
    }

    pub fn with_compressor(mut self, compressor: CompressorKind) -> Self {
        self.options.compressor = compressor;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.options.socket_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.options.password = Some(password.into());
        self
    }

    /// Connection settings for data nodes of `database`
    pub fn connect_params(&self, database: i64) -> ConnectParams {
        ConnectParams {
            database,
            password: self.options.password.clone(),
            connect_timeout: self
                .options
                .socket_connect_timeout_ms
                .map(Duration::from_millis),
            socket_timeout: self.options.socket_timeout_ms.map(Duration::from_millis),
        }
    }
}
