//! Process-wide query cache for collection reads.
//!
//! Entries are keyed by `(resource, operation, params-hash)` and hold the
//! JSON form of the cached result. An entry is *fresh* for `fresh_for` after
//! it was fetched and is dropped entirely after `retain_for`. Invalidation
//! marks entries stale without dropping them, so a failed refetch can still
//! fall back to the last known value.

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::db::query::ListParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Detail,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub resource: &'static str,
    pub operation: Operation,
    pub params: String,
}

impl CacheKey {
    pub fn list<P: Serialize>(resource: &'static str, params: &P) -> Self {
        Self {
            resource,
            operation: Operation::List,
            params: hash_params(params),
        }
    }

    pub fn detail(resource: &'static str, id: &str) -> Self {
        Self {
            resource,
            operation: Operation::Detail,
            params: id.to_string(),
        }
    }
}

fn hash_params<P: Serialize>(params: &P) -> String {
    // Serialization of plain data structs cannot fail; fall back to an empty key
    let json = serde_json::to_vec(params).unwrap_or_default();
    let digest = Sha256::digest(&json);
    hex::encode(&digest[..12])
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    /// Params a cached list was fetched with
    params: Option<ListParams>,
    fetched_at: Instant,
    stale: bool,
}

/// A cached value and whether it may be served without refetching
#[derive(Debug, Clone)]
pub struct CacheLookup<T> {
    pub value: T,
    pub fresh: bool,
}

#[derive(Debug)]
pub struct QueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    fresh_for: Duration,
    retain_for: Duration,
}

impl QueryCache {
    pub fn new(fresh_for: Duration, retain_for: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            fresh_for,
            retain_for,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            Duration::from_secs(config.fresh_secs),
            Duration::from_secs(config.retain_secs),
        )
    }

    /// Look up an entry, dropping it if it outlived the retention window
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheLookup<T>> {
        let now = Instant::now();
        let (value, fresh) = {
            let entry = self.entries.get(key)?;
            let age = now.duration_since(entry.fetched_at);
            if age >= self.retain_for {
                drop(entry);
                self.entries.remove(key);
                return None;
            }
            (entry.value.clone(), !entry.stale && age < self.fresh_for)
        };

        match serde_json::from_value(value) {
            Ok(value) => Some(CacheLookup { value, fresh }),
            Err(e) => {
                tracing::warn!(resource = key.resource, error = %e, "Dropping undecodable cache entry");
                self.entries.remove(key);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: CacheKey, value: &T) {
        self.set_with_params(key, None, value);
    }

    /// Cache a list result along with the params that produced it
    pub fn set_with_params<T: Serialize>(&self, key: CacheKey, params: Option<ListParams>, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.entries.insert(
                    key,
                    CacheEntry {
                        value,
                        params,
                        fetched_at: Instant::now(),
                        stale: false,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(resource = key.resource, error = %e, "Failed to cache value");
            }
        }
    }

    /// Mark every entry of `resource`/`operation` stale
    pub fn invalidate(&self, resource: &str, operation: Operation) -> usize {
        let mut count = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.key().resource == resource && entry.key().operation == operation {
                entry.value_mut().stale = true;
                count += 1;
            }
        }
        count
    }

    pub fn evict(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    /// Apply `f` to the cached JSON of every list entry of `resource`.
    ///
    /// `f` also receives the params the list was fetched with, if known.
    pub fn update_lists(&self, resource: &str, f: impl Fn(Option<&ListParams>, &mut Value)) {
        for mut entry in self.entries.iter_mut() {
            if entry.key().resource == resource && entry.key().operation == Operation::List {
                let entry = entry.value_mut();
                f(entry.params.as_ref(), &mut entry.value);
            }
        }
    }

    /// Drop entries older than the retention window
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.fetched_at) < self.retain_for);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
