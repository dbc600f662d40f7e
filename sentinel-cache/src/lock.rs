//! Distributed lock
//!
//! Acquired with `SET key token PX timeout NX` and released with a
//! compare-and-delete, so a handle can only release the lock while the
//! stored token is still its own.

use crate::cache::KeyMaker;
use crate::client::FailoverClient;
use crate::command::{Command, Expiry, SetCondition};
use crate::error::{CacheError, Result};
use crate::types::Routing;
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_SLEEP: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(1);
const MIN_BACKOFF: Duration = Duration::from_millis(1);

/// Handle to a named lock
///
/// # Example
/// ```
/// use sentinel_cache::memory::MemoryCluster;
/// use sentinel_cache::types::Endpoint;
/// use sentinel_cache::{Cache, CacheConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn main() -> sentinel_cache::Result<()> {
/// let cluster = MemoryCluster::new("mymaster")
///     .with_sentinel(Endpoint::new("sentinel-1", 26379))
///     .with_master(Endpoint::new("redis-1", 6379));
/// let cache = Cache::with_connector(CacheConfig::new(cluster.sentinel_location(0)), Arc::new(cluster))?;
///
/// let mut lock = cache
///     .lock("reports", Some(Duration::from_secs(30)))
///     .blocking_timeout(Duration::from_secs(5));
/// if lock.acquire(true)? {
///     // critical section
///     lock.release()?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Lock {
    client: FailoverClient,
    keys: KeyMaker,
    name: String,
    version: Option<i64>,
    timeout: Option<Duration>,
    blocking_timeout: Option<Duration>,
    sleep: Duration,
    token: Option<String>,
}

impl Lock {
    pub(crate) fn new(
        client: FailoverClient,
        keys: KeyMaker,
        name: &str,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            client,
            keys,
            name: name.to_string(),
            version: None,
            timeout: timeout.filter(|t| !t.is_zero()),
            blocking_timeout: None,
            sleep: DEFAULT_SLEEP,
            token: None,
        }
    }

    /// Give up a blocking acquire after this long (default: wait forever)
    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = Some(timeout);
        self
    }

    /// Initial wait between attempts; doubles up to one second
    pub fn sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key holding the lock
    pub fn key(&self) -> String {
        self.keys.make_key(&self.name, self.version)
    }

    /// Token of the current acquisition, if any
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Try to take the lock. Without `blocking` only one attempt is made.
    pub fn acquire(&mut self, blocking: bool) -> Result<bool> {
        let token = Uuid::new_v4().to_string();
        let key = self.key();
        let deadline = self.blocking_timeout.map(|t| Instant::now() + t);
        let mut backoff = self.sleep.max(MIN_BACKOFF);

        loop {
            let command = Command::Set {
                key: key.clone(),
                value: token.clone().into_bytes(),
                expiry: self.timeout.map(|t| Expiry::Millis(t.as_millis().max(1) as u64)),
                condition: Some(SetCondition::IfAbsent),
            };
            if self.client.execute(&command, Routing::Write)?.is_ok() {
                debug!("Acquired lock '{}'", self.name);
                self.token = Some(token);
                return Ok(true);
            }

            if !blocking {
                return Ok(false);
            }

            let mut wait = jittered(backoff);
            if let Some(deadline) = deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    debug!("Gave up waiting for lock '{}'", self.name);
                    return Ok(false);
                }
                wait = wait.min(left);
            }

            thread::sleep(wait);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Release the lock if this handle still owns it
    pub fn release(&mut self) -> Result<()> {
        let token = self.token.take().ok_or_else(|| {
            CacheError::Lock(format!("cannot release unlocked lock '{}'", self.name))
        })?;

        let command = Command::CompareAndDelete {
            key: self.key(),
            expected: token.into_bytes(),
        };
        if self.client.execute(&command, Routing::Write)?.as_int()? == 1 {
            debug!("Released lock '{}'", self.name);
            return Ok(());
        }

        warn!("Lock '{}' expired or was taken over before release", self.name);
        Err(CacheError::Lock(format!(
            "lock '{}' is no longer owned by this handle",
            self.name
        )))
    }

    /// Whether anyone holds the lock
    pub fn locked(&self) -> Result<bool> {
        let command = Command::Exists {
            keys: vec![self.key()],
        };
        Ok(self.client.execute(&command, Routing::Write)?.as_int()? > 0)
    }

    /// Whether this handle holds the lock
    pub fn owned(&self) -> Result<bool> {
        let Some(token) = &self.token else {
            return Ok(false);
        };
        let stored = self
            .client
            .execute(&Command::get(self.key()), Routing::Write)?
            .into_bytes()?;
        Ok(stored.as_deref() == Some(token.as_bytes()))
    }
}

/// Add up to 50% random jitter, kept within [`MIN_BACKOFF`] and [`MAX_BACKOFF`]
fn jittered(backoff: Duration) -> Duration {
    let backoff = backoff.max(MIN_BACKOFF);
    let max_jitter = (backoff.as_millis() / 2) as u64;
    let jitter = if max_jitter == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max_jitter)
    };
    (backoff + Duration::from_millis(jitter)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::setup_test_cache;
    use crate::types::Endpoint;

    #[test]
    fn test_acquire_release() {
        let (cluster, cache) = setup_test_cache();
        let mut lock = cache.lock("job", None);

        assert!(lock.acquire(false).unwrap());
        assert!(lock.locked().unwrap());
        assert!(lock.owned().unwrap());
        assert_eq!(
            cluster.raw_get(0, "test:1:job").as_deref(),
            lock.token().map(str::as_bytes)
        );

        lock.release().unwrap();
        assert!(!lock.locked().unwrap());
        assert!(!lock.owned().unwrap());
    }

    #[test]
    fn test_release_unacquired() {
        let (_cluster, cache) = setup_test_cache();
        let mut lock = cache.lock("job", None);
        assert!(matches!(lock.release(), Err(CacheError::Lock(_))));
    }

    #[test]
    fn test_lock_timeout_expires() {
        let (_cluster, cache) = setup_test_cache();
        let mut lock = cache.lock("job", Some(Duration::from_millis(30)));
        assert!(lock.acquire(false).unwrap());

        thread::sleep(Duration::from_millis(60));
        assert!(!lock.locked().unwrap());
        assert!(matches!(lock.release(), Err(CacheError::Lock(_))));
    }

    #[test]
    fn test_blocking_timeout() {
        let (_cluster, cache) = setup_test_cache();
        let mut holder = cache.lock("job", None);
        assert!(holder.acquire(false).unwrap());

        let mut waiter = cache
            .lock("job", None)
            .blocking_timeout(Duration::from_millis(50))
            .sleep(Duration::from_millis(10));
        let started = Instant::now();
        assert!(!waiter.acquire(true).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_versioned_lock_key() {
        let (_cluster, cache) = setup_test_cache();
        let lock = cache.lock("job", None).version(7);
        assert_eq!(lock.key(), "test:7:job");
        assert_eq!(lock.name(), "job");
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let wait = jittered(Duration::from_millis(100));
            assert!(wait >= Duration::from_millis(100));
            assert!(wait <= Duration::from_millis(150));
        }
        assert_eq!(jittered(Duration::from_secs(5)), MAX_BACKOFF);
        assert!(jittered(Duration::ZERO) >= MIN_BACKOFF);
    }

    #[test]
    fn test_zero_sleep_still_backs_off() {
        let (cluster, cache) = setup_test_cache();
        let mut holder = cache.lock("job", None);
        assert!(holder.acquire(false).unwrap());
        let master = Endpoint::new("redis-1", 6379);
        let before = cluster.commands_served(&master);

        let mut waiter = cache
            .lock("job", None)
            .blocking_timeout(Duration::from_millis(50))
            .sleep(Duration::ZERO);
        assert!(!waiter.acquire(true).unwrap());

        // 1, 2, 4, 8, 16 ms waits fit before the deadline, plus jitter
        assert!(cluster.commands_served(&master) - before <= 10);
    }
}
