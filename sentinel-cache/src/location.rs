//! Connection descriptor parsing
//!
//! Sentinel descriptors look like
//! `mymaster/10.0.0.1:26379/0,mymaster/10.0.0.2:26379/0`: one entry per
//! sentinel, all naming the same service and database.
//!
//! Direct descriptors look like `redis://10.0.0.1:6379/0,10.0.0.2:6379/0`:
//! the first entry is the master, the others are read replicas.

use crate::error::{CacheError, Result};
use crate::types::{DirectTopology, Endpoint, ServiceTopology};

/// Parse a sentinel connection descriptor
pub fn parse_sentinel_location(location: &str) -> Result<ServiceTopology> {
    if location.trim().is_empty() {
        return Err(config_err("connection descriptor is empty"));
    }

    let mut service_name: Option<String> = None;
    let mut database: Option<i64> = None;
    let mut sentinels = Vec::new();

    for entry in location.split(',').map(str::trim) {
        if entry.is_empty() {
            return Err(config_err("empty entry in connection descriptor"));
        }

        let parts: Vec<&str> = entry.split('/').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.trim().is_empty()) {
            return Err(config_err(format!(
                "entry '{}' must have the form service/host:port/db",
                entry
            )));
        }

        let name = parts[0].trim();
        let endpoint: Endpoint = parts[1].trim().parse()?;
        let db = parse_database(parts[2].trim(), entry)?;

        match &service_name {
            Some(existing) if existing != name => {
                return Err(config_err(format!(
                    "service name '{}' differs from '{}'",
                    name, existing
                )));
            }
            Some(_) => {}
            None => service_name = Some(name.to_string()),
        }

        match database {
            Some(existing) if existing != db => {
                return Err(config_err(format!(
                    "database {} differs from {} in entry '{}'",
                    db, existing, entry
                )));
            }
            Some(_) => {}
            None => database = Some(db),
        }

        if !sentinels.contains(&endpoint) {
            sentinels.push(endpoint);
        }
    }

    Ok(ServiceTopology {
        service_name: service_name.unwrap_or_default(),
        sentinels,
        database: database.unwrap_or_default(),
        key_prefix: None,
    })
}

/// Parse a direct (non-sentinel) connection descriptor
pub fn parse_direct_location(location: &str) -> Result<DirectTopology> {
    if location.trim().is_empty() {
        return Err(config_err("connection descriptor is empty"));
    }

    let mut database: Option<i64> = None;
    let mut endpoints = Vec::new();

    for entry in location.split(',').map(str::trim) {
        if entry.is_empty() {
            return Err(config_err("empty entry in connection descriptor"));
        }

        let address = entry.strip_prefix("redis://").unwrap_or(entry);
        let (addr, db) = match address.split_once('/') {
            Some((addr, "")) => (addr, 0),
            Some((addr, db)) => (addr, parse_database(db, entry)?),
            None => (address, 0),
        };

        match database {
            Some(existing) if existing != db => {
                return Err(config_err(format!(
                    "database {} differs from {} in entry '{}'",
                    db, existing, entry
                )));
            }
            Some(_) => {}
            None => database = Some(db),
        }

        endpoints.push(addr.parse::<Endpoint>()?);
    }

    let mut endpoints = endpoints.into_iter();
    let master = endpoints
        .next()
        .ok_or_else(|| config_err("connection descriptor names no master"))?;

    Ok(DirectTopology {
        master,
        replicas: endpoints.collect(),
        database: database.unwrap_or_default(),
    })
}

fn parse_database(raw: &str, entry: &str) -> Result<i64> {
    match raw.parse::<i64>() {
        Ok(db) if db >= 0 => Ok(db),
        _ => Err(config_err(format!(
            "invalid database index '{}' in entry '{}'",
            raw, entry
        ))),
    }
}

fn config_err(msg: impl Into<String>) -> CacheError {
    CacheError::Configuration(msg.into())
}
