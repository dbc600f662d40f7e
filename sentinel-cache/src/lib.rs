//! # Sentinel Cache
//!
//! Cache client for a replicated key-value store whose master can change at
//! runtime under sentinel supervision.
//!
//! ## Features
//!
//! - 🔎 **Master discovery**: asks the configured sentinels which node is master
//! - 🔁 **Transparent failover**: a connection failure refreshes the route and retries once
//! - 📖 **Replica reads**: optional read routing to healthy replicas
//! - 🔢 **Exact counters**: increments stay exact past the 64-bit range
//! - 🔒 **Distributed locks**: token-checked release
//! - 🧪 **In-process backend**: a simulated sentinel deployment for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sentinel_cache::{Cache, CacheConfig, SetOptions, Timeout};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CacheConfig::new("mymaster/10.0.0.1:26379/0,mymaster/10.0.0.2:26379/0")
//!         .with_key_prefix("app");
//!     let cache = Cache::new(config)?;
//!
//!     cache.set("user:1", "John Doe", SetOptions::new().timeout(Timeout::Seconds(3600)))?;
//!     let value: Option<String> = cache.get("user:1", None)?;
//!     println!("Value: {:?}", value);
//!
//!     let hits = cache.incr("hits", 1, None);
//!     println!("Hits: {:?}", hits);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod glob;
pub mod location;
pub mod lock;
pub mod memory;
pub mod pool;
mod scan;
pub mod sentinel;
pub mod transport;
pub mod types;

#[cfg(test)]
mod tests;

pub use cache::{Cache, KeyMaker, SetOptions, Timeout};
pub use client::{ClientRegistry, FailoverClient};
pub use config::{CacheConfig, CacheOptions, CompressorKind, ReplicaPolicy, SerializerKind};
pub use error::{CacheError, Result};
pub use lock::Lock;
pub use scan::KeyIter;
pub use types::{Endpoint, ResolvedRoute, Routing};
