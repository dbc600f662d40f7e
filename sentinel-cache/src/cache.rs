//! Cache operations on top of the failover-aware client
//!
//! Every key is namespaced as `{prefix}:{version}:{key}` before it reaches
//! the store, so data written at one version is invisible at another.

use crate::client::{ClientRegistry, FailoverClient};
use crate::codec::Codec;
use crate::command::{Command, Expiry, Reply, SetCondition};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::glob::glob_escape;
use crate::lock::Lock;
use crate::scan::{KeyIter, ScanPages};
use crate::transport::{Connector, RedisConnector};
use crate::types::Routing;
use num_bigint::BigInt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Expiry requested for a write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timeout {
    /// The configured `default_timeout_secs`
    #[default]
    Default,
    /// Never expire
    Never,
    /// Expire after this many seconds; zero or less means "do not store"
    Seconds(i64),
    /// Expire after this many milliseconds; zero or less means "do not store"
    Millis(i64),
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::Millis(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
    }
}

/// Options for [`Cache::set`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub timeout: Timeout,
    pub version: Option<i64>,
    /// Only write when the key does not exist
    pub nx: bool,
    /// Only write when the key already exists
    pub xx: bool,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn nx(mut self) -> Self {
        self.nx = true;
        self
    }

    pub fn xx(mut self) -> Self {
        self.xx = true;
        self
    }
}

/// Builds namespaced store keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaker {
    prefix: String,
    default_version: i64,
}

impl KeyMaker {
    pub fn new(prefix: impl Into<String>, default_version: i64) -> Self {
        Self {
            prefix: prefix.into(),
            default_version,
        }
    }

    pub fn version(&self, version: Option<i64>) -> i64 {
        version.unwrap_or(self.default_version)
    }

    /// `{prefix}:{version}:{key}`
    pub fn make_key(&self, key: &str, version: Option<i64>) -> String {
        format!("{}:{}:{}", self.prefix, self.version(version), key)
    }

    /// Store pattern for a glob over raw keys; the prefix matches literally
    pub fn make_pattern(&self, pattern: &str, version: Option<i64>) -> String {
        format!(
            "{}:{}:{}",
            glob_escape(&self.prefix),
            self.version(version),
            pattern
        )
    }
}

enum Expiration {
    Persistent,
    After(Expiry),
    /// Already expired: the value must not be stored
    Expired,
}

/// Cache backed by a sentinel-managed (or directly addressed) store
///
/// # Example
/// ```
/// use sentinel_cache::memory::MemoryCluster;
/// use sentinel_cache::types::Endpoint;
/// use sentinel_cache::{Cache, CacheConfig, SetOptions};
/// use std::sync::Arc;
///
/// # fn main() -> sentinel_cache::Result<()> {
/// let cluster = MemoryCluster::new("mymaster")
///     .with_sentinel(Endpoint::new("sentinel-1", 26379))
///     .with_master(Endpoint::new("redis-1", 6379));
///
/// let config = CacheConfig::new(cluster.sentinel_location(0)).with_key_prefix("app");
/// let cache = Cache::with_connector(config, Arc::new(cluster))?;
///
/// cache.set("user:1", "Ada", SetOptions::new())?;
/// let name: Option<String> = cache.get("user:1", None)?;
/// assert_eq!(name.as_deref(), Some("Ada"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Cache {
    client: FailoverClient,
    codec: Codec,
    keys: KeyMaker,
    default_timeout: Option<u64>,
    scan_count: usize,
}

impl Cache {
    /// Connect to real store nodes with the configured client class
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(RedisConnector::new()))
    }

    /// Use a custom connector, e.g. [`crate::memory::MemoryCluster`]
    pub fn with_connector(config: CacheConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::with_registry(config, &ClientRegistry::default(), connector)
    }

    /// Resolve the client class through a custom registry
    pub fn with_registry(
        config: CacheConfig,
        registry: &ClientRegistry,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let client = registry.build(&config, connector)?;
        let prefix = client
            .key_prefix()
            .map(str::to_string)
            .unwrap_or(config.key_prefix);
        Ok(Self {
            codec: Codec::from_options(&config.options),
            keys: KeyMaker::new(prefix, config.version),
            client,
            default_timeout: config.default_timeout_secs,
            scan_count: config.options.scan_count,
        })
    }

    /// Underlying failover-aware client
    pub fn client(&self) -> &FailoverClient {
        &self.client
    }

    pub fn make_key(&self, key: &str, version: Option<i64>) -> String {
        self.keys.make_key(key, version)
    }

    pub fn make_pattern(&self, pattern: &str, version: Option<i64>) -> String {
        self.keys.make_pattern(pattern, version)
    }

    /// Get a value
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    pub fn get<T, K>(&self, key: K, version: Option<i64>) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        let command = Command::get(self.keys.make_key(key.as_ref(), version));
        match self.client.execute(&command, Routing::Read)?.into_bytes()? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store a value. Returns whether the value was written.
    ///
    /// With `nx` an existing key is left untouched (value and expiry). A
    /// timeout of zero or less stores nothing: without `nx` the key is
    /// deleted, with `nx` the result reports whether the key is absent.
    pub fn set<T, K>(&self, key: K, value: &T, options: SetOptions) -> Result<bool>
    where
        T: Serialize + ?Sized,
        K: AsRef<str>,
    {
        if options.nx && options.xx {
            return Err(CacheError::InvalidValue(
                "nx and xx cannot be combined".to_string(),
            ));
        }

        let encoded = self.keys.make_key(key.as_ref(), options.version);
        let expiry = match self.expiration(options.timeout) {
            Expiration::Persistent => None,
            Expiration::After(expiry) => Some(expiry),
            Expiration::Expired => {
                if options.nx {
                    return Ok(!self.exists_encoded(encoded, Routing::Write)?);
                }
                self.client
                    .execute(&Command::del(vec![encoded]), Routing::Write)?;
                return Ok(false);
            }
        };

        let condition = if options.nx {
            Some(SetCondition::IfAbsent)
        } else if options.xx {
            Some(SetCondition::IfExists)
        } else {
            None
        };

        let command = Command::Set {
            key: encoded,
            value: self.codec.encode(value)?,
            expiry,
            condition,
        };
        Ok(self.client.execute(&command, Routing::Write)?.is_ok())
    }

    /// Store a value only if the key does not exist yet
    pub fn add<T, K>(&self, key: K, value: &T, timeout: Timeout) -> Result<bool>
    where
        T: Serialize + ?Sized,
        K: AsRef<str>,
    {
        self.set(key, value, SetOptions::new().timeout(timeout).nx())
    }

    /// Fetch several keys at once. Missing keys are absent from the result.
    pub fn get_many<T, K>(&self, keys: &[K], version: Option<i64>) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
    {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let encoded = keys
            .iter()
            .map(|k| self.keys.make_key(k.as_ref(), version))
            .collect();
        let replies = self
            .client
            .execute(&Command::MGet { keys: encoded }, Routing::Read)?
            .into_array()?;

        let mut found = HashMap::new();
        for (key, reply) in keys.iter().zip(replies) {
            if let Some(bytes) = reply.into_bytes()? {
                found.insert(key.as_ref().to_string(), self.codec.decode(&bytes)?);
            }
        }
        Ok(found)
    }

    /// Store several values in one pipelined round-trip
    pub fn set_many<I, K, V>(&self, items: I, timeout: Timeout, version: Option<i64>) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let expiry = match self.expiration(timeout) {
            Expiration::Persistent => None,
            Expiration::After(expiry) => Some(expiry),
            Expiration::Expired => {
                self.delete_many(items.into_iter().map(|(k, _)| k), version)?;
                return Ok(());
            }
        };

        let commands = items
            .into_iter()
            .map(|(key, value)| {
                Ok(Command::Set {
                    key: self.keys.make_key(key.as_ref(), version),
                    value: self.codec.encode(&value)?,
                    expiry,
                    condition: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.client.pipeline(&commands, Routing::Write)?;
        Ok(())
    }

    /// Delete a key. Returns whether it existed.
    pub fn delete<K: AsRef<str>>(&self, key: K, version: Option<i64>) -> Result<bool> {
        Ok(self.delete_many([key], version)? > 0)
    }

    /// Delete several keys, returning how many existed.
    ///
    /// An empty input never reaches the store.
    pub fn delete_many<I, K>(&self, keys: I, version: Option<i64>) -> Result<usize>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let encoded: Vec<String> = keys
            .into_iter()
            .map(|k| self.keys.make_key(k.as_ref(), version))
            .collect();
        if encoded.is_empty() {
            return Ok(0);
        }

        let removed = self
            .client
            .execute(&Command::del(encoded), Routing::Write)?
            .as_int()?;
        Ok(removed.max(0) as usize)
    }

    /// Delete every key matching a glob, one SCAN page at a time.
    /// Returns the number of deleted keys.
    pub fn delete_pattern(
        &self,
        pattern: &str,
        version: Option<i64>,
        itersize: Option<usize>,
    ) -> Result<usize> {
        let mut pages = ScanPages::new(
            self.client.clone(),
            self.keys.make_pattern(pattern, version),
            itersize.unwrap_or(self.scan_count),
            Routing::Write,
        );

        let mut deleted = 0;
        while let Some(page) = pages.next_page()? {
            if page.is_empty() {
                continue;
            }
            let removed = self
                .client
                .execute(&Command::del(page), Routing::Write)?
                .as_int()?;
            deleted += removed.max(0) as usize;
        }

        debug!("delete_pattern '{}' removed {} keys", pattern, deleted);
        Ok(deleted)
    }

    /// Lazily iterate raw keys matching a glob
    pub fn iter_keys(&self, pattern: &str, version: Option<i64>, itersize: Option<usize>) -> KeyIter {
        let pages = ScanPages::new(
            self.client.clone(),
            self.keys.make_pattern(pattern, version),
            itersize.unwrap_or(self.scan_count),
            Routing::Read,
        );
        KeyIter::new(pages, self.keys.make_key("", version))
    }

    /// All raw keys matching a glob
    pub fn keys(&self, pattern: &str, version: Option<i64>) -> Result<Vec<String>> {
        self.iter_keys(pattern, version, None).collect()
    }

    pub fn has_key<K: AsRef<str>>(&self, key: K, version: Option<i64>) -> Result<bool> {
        self.exists_encoded(self.keys.make_key(key.as_ref(), version), Routing::Read)
    }

    /// Add `delta` to an integer value.
    ///
    /// Fails with [`CacheError::NotFound`] when the key does not exist.
    /// Results beyond the 64-bit range stay exact.
    pub fn incr<K: AsRef<str>>(&self, key: K, delta: i64, version: Option<i64>) -> Result<BigInt> {
        let key = key.as_ref();
        let encoded = self.keys.make_key(key, version);

        let command = Command::IncrByExisting {
            key: encoded.clone(),
            delta,
        };
        match self.client.execute(&command, Routing::Write) {
            Ok(Reply::Nil) => Err(CacheError::NotFound(key.to_string())),
            Ok(reply) => Ok(BigInt::from(reply.as_int()?)),
            Err(CacheError::Store(reason)) => {
                debug!("INCRBY on '{}' rejected ({}); using exact arithmetic", key, reason);
                self.incr_exact(key, encoded, BigInt::from(delta))
            }
            Err(e) => Err(e),
        }
    }

    /// Subtract `delta` from an integer value
    pub fn decr<K: AsRef<str>>(&self, key: K, delta: i64, version: Option<i64>) -> Result<BigInt> {
        match delta.checked_neg() {
            Some(negated) => self.incr(key, negated, version),
            None => {
                let key = key.as_ref();
                let encoded = self.keys.make_key(key, version);
                self.incr_exact(key, encoded, -BigInt::from(delta))
            }
        }
    }

    /// Read, add and write back with the remaining TTL
    fn incr_exact(&self, key: &str, encoded: String, delta: BigInt) -> Result<BigInt> {
        let bytes = self
            .client
            .execute(&Command::get(encoded.clone()), Routing::Write)?
            .into_bytes()?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;

        let current = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<BigInt>().ok())
            .ok_or_else(|| {
                CacheError::InvalidValue(format!("value of '{}' is not an integer", key))
            })?;
        let updated = current + delta;

        let expiry = self.remaining_expiry(key, &encoded)?;
        let command = Command::Set {
            key: encoded,
            value: updated.to_string().into_bytes(),
            expiry,
            condition: Some(SetCondition::IfExists),
        };
        if !self.client.execute(&command, Routing::Write)?.is_ok() {
            return Err(CacheError::NotFound(key.to_string()));
        }
        Ok(updated)
    }

    /// Move a key to `version + delta`, keeping its TTL. Returns the new
    /// version.
    ///
    /// Read, write and delete are separate commands; a concurrent writer to
    /// the same key can interleave with them.
    pub fn incr_version<K: AsRef<str>>(
        &self,
        key: K,
        delta: i64,
        version: Option<i64>,
    ) -> Result<i64> {
        let key = key.as_ref();
        let old_version = self.keys.version(version);
        let new_version = old_version + delta;
        let old_key = self.keys.make_key(key, Some(old_version));

        let value = self
            .client
            .execute(&Command::get(old_key.clone()), Routing::Write)?
            .into_bytes()?
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        let expiry = self.remaining_expiry(key, &old_key)?;

        let command = Command::Set {
            key: self.keys.make_key(key, Some(new_version)),
            value,
            expiry,
            condition: None,
        };
        self.client.execute(&command, Routing::Write)?;
        self.client
            .execute(&Command::del(vec![old_key]), Routing::Write)?;

        debug!("Moved '{}' from version {} to {}", key, old_version, new_version);
        Ok(new_version)
    }

    pub fn decr_version<K: AsRef<str>>(
        &self,
        key: K,
        delta: i64,
        version: Option<i64>,
    ) -> Result<i64> {
        self.incr_version(key, -delta, version)
    }

    /// Remaining seconds: `None` without expiry, `Some(0)` for missing keys
    pub fn ttl<K: AsRef<str>>(&self, key: K, version: Option<i64>) -> Result<Option<u64>> {
        let command = Command::Ttl {
            key: self.keys.make_key(key.as_ref(), version),
        };
        match self.client.execute(&command, Routing::Read)?.as_int()? {
            -1 => Ok(None),
            n if n < 0 => Ok(Some(0)),
            n => Ok(Some(n as u64)),
        }
    }

    /// Remove any expiry. Returns whether an expiry was removed.
    pub fn persist<K: AsRef<str>>(&self, key: K, version: Option<i64>) -> Result<bool> {
        let command = Command::Persist {
            key: self.keys.make_key(key.as_ref(), version),
        };
        Ok(self.client.execute(&command, Routing::Write)?.as_int()? == 1)
    }

    /// Expire an existing key after `seconds`. Returns whether the key exists.
    pub fn expire<K: AsRef<str>>(&self, key: K, seconds: i64, version: Option<i64>) -> Result<bool> {
        let command = Command::Expire {
            key: self.keys.make_key(key.as_ref(), version),
            seconds,
        };
        Ok(self.client.execute(&command, Routing::Write)?.as_int()? == 1)
    }

    /// Reset the expiry of an existing key. Returns whether the key exists.
    pub fn touch<K: AsRef<str>>(&self, key: K, timeout: Timeout, version: Option<i64>) -> Result<bool> {
        let encoded = self.keys.make_key(key.as_ref(), version);
        match self.expiration(timeout) {
            Expiration::Persistent => {
                let replies = self.client.pipeline(
                    &[
                        Command::Persist {
                            key: encoded.clone(),
                        },
                        Command::Exists { keys: vec![encoded] },
                    ],
                    Routing::Write,
                )?;
                match replies.get(1) {
                    Some(reply) => Ok(reply.as_int()? > 0),
                    None => Err(CacheError::Store("short pipeline reply".to_string())),
                }
            }
            Expiration::After(expiry) => {
                let seconds = match expiry {
                    Expiry::Seconds(secs) => secs,
                    Expiry::Millis(ms) => ms.div_ceil(1000),
                };
                let command = Command::Expire {
                    key: encoded,
                    seconds: seconds as i64,
                };
                Ok(self.client.execute(&command, Routing::Write)?.as_int()? == 1)
            }
            Expiration::Expired => {
                let removed = self
                    .client
                    .execute(&Command::del(vec![encoded]), Routing::Write)?
                    .as_int()?;
                Ok(removed > 0)
            }
        }
    }

    /// Distributed lock stored under the cache key `name`.
    ///
    /// `timeout` bounds how long the lock lives if never released.
    pub fn lock(&self, name: &str, timeout: Option<Duration>) -> Lock {
        Lock::new(self.client.clone(), self.keys.clone(), name, timeout)
    }

    /// Remove every key in the configured database
    pub fn clear(&self) -> Result<()> {
        self.client.execute(&Command::FlushDb, Routing::Write)?;
        Ok(())
    }

    /// Drop all pooled connections; the cache stays usable
    pub fn close(&self) {
        self.client.close();
    }

    fn exists_encoded(&self, encoded: String, routing: Routing) -> Result<bool> {
        let command = Command::Exists {
            keys: vec![encoded],
        };
        Ok(self.client.execute(&command, routing)?.as_int()? > 0)
    }

    /// Remaining expiry in milliseconds; a key that expired meanwhile is
    /// reported as missing
    fn remaining_expiry(&self, key: &str, encoded: &str) -> Result<Option<Expiry>> {
        let command = Command::Pttl {
            key: encoded.to_string(),
        };
        match self.client.execute(&command, Routing::Write)?.as_int()? {
            -1 => Ok(None),
            ms if ms > 0 => Ok(Some(Expiry::Millis(ms as u64))),
            _ => Err(CacheError::NotFound(key.to_string())),
        }
    }

    fn expiration(&self, timeout: Timeout) -> Expiration {
        match timeout {
            Timeout::Default => match self.default_timeout {
                None => Expiration::Persistent,
                Some(0) => Expiration::Expired,
                Some(secs) => Expiration::After(Expiry::Seconds(secs)),
            },
            Timeout::Never => Expiration::Persistent,
            Timeout::Seconds(secs) if secs <= 0 => Expiration::Expired,
            Timeout::Seconds(secs) => Expiration::After(Expiry::Seconds(secs as u64)),
            Timeout::Millis(ms) if ms <= 0 => Expiration::Expired,
            Timeout::Millis(ms) => Expiration::After(Expiry::Millis(ms as u64)),
        }
    }
}
