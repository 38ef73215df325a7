//! # Offshore Cache
//!
//! Versioned cache partitions for the offshore worker engine.
//!
//! ## Features
//!
//! - **Partitions**: named response stores, one per role and version
//!   (`back9-static-v15`, `back9-api-v15`, ...)
//! - **Request identity keys**: method + absolute URL, query string significant
//! - **Response snapshots**: status, headers and body bytes captured at store time
//! - **Namespace management**: idempotent `open`, bulk eviction of stale versions
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     ├── Partition ("back9-static-v15")
//!     │       └── CacheKey → CacheEntry
//!     ├── Partition ("back9-api-v15")
//!     └── Partition ("back9-images-v15")
//! ```
//!
//! Partitions are cheap clones over shared state: every handle returned by
//! [`CacheStorage::open`] for the same name reads and writes the same map,
//! so the storage can outlive any single worker generation.

use bytes::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// Default per-partition entry limit.
pub const DEFAULT_MAX_ENTRIES: usize = 2048;

// ==================== Errors ====================

/// Errors that can occur in cache operations.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Partition '{partition}' is full ({limit} entries)")]
    QuotaExceeded { partition: String, limit: usize },
}

// ==================== Keys ====================

/// Request identity: method plus absolute URL.
///
/// The query string is part of the identity, so `/api?code=1` and
/// `/api?code=2` are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Request method (normalized to uppercase).
    method: String,

    /// Absolute request URL.
    url: String,
}

impl CacheKey {
    /// Create a key from a method and an absolute URL.
    pub fn new(method: &str, url: &Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Create a GET key, the common case for intercepted requests.
    pub fn get(url: &Url) -> Self {
        Self::new("GET", url)
    }

    /// Request method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Absolute request URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== Entries ====================

/// A stored response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Bytes,

    /// Stored-at timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CacheEntry {
    /// Create an entry stamped with the current time.
    pub fn new(status: u16, headers: HashMap<String, String>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: now_millis(),
        }
    }

    /// Look up a header value, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the snapshot holds a 2xx response.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ==================== Partition ====================

/// A named cache partition.
///
/// Clones share the underlying map; concurrent writers to the same key are
/// last-write-wins.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Partition name, e.g. `back9-static-v15`.
    pub name: String,

    max_entries: usize,
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry>>>,
}

impl Partition {
    /// Create a new empty partition.
    pub fn new(name: &str, max_entries: usize) -> Self {
        Self {
            name: name.to_string(),
            max_entries,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Match a request identity against the partition.
    pub async fn match_request(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// Store a snapshot under a request identity, overwriting any
    /// previous entry for the same identity.
    pub async fn put(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            return Err(CacheError::QuotaExceeded {
                partition: self.name.clone(),
                limit: self.max_entries,
            });
        }
        entries.insert(key, entry);
        Ok(())
    }

    /// Delete an entry.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Get all stored request identities.
    pub async fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the partition is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// ==================== Cache Storage ====================

/// The partition namespace.
///
/// Clones share the registry, so one storage can serve successive worker
/// generations: a new version opens its own partitions while the old
/// version's partitions stay addressable until evicted.
#[derive(Debug, Clone)]
pub struct CacheStorage {
    partitions: Arc<RwLock<HashMap<String, Partition>>>,
    max_entries: usize,
}

impl CacheStorage {
    /// Create new storage with the default per-partition limit.
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    /// Create new storage with a custom per-partition entry limit.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            partitions: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
        }
    }

    /// Open a partition, creating it if it does not exist.
    ///
    /// Opening the same name twice returns handles over the same map.
    pub async fn open(&self, name: &str) -> Partition {
        let mut partitions = self.partitions.write().await;
        partitions
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(partition = %name, "creating cache partition");
                Partition::new(name, self.max_entries)
            })
            .clone()
    }

    /// Check if a partition exists.
    pub async fn has(&self, name: &str) -> bool {
        self.partitions.read().await.contains_key(name)
    }

    /// Delete a partition and everything in it.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.partitions.write().await.remove(name).is_some();
        if removed {
            info!(partition = %name, "deleted cache partition");
        }
        removed
    }

    /// Get all partition names.
    pub async fn keys(&self) -> Vec<String> {
        self.partitions.read().await.keys().cloned().collect()
    }

    /// Delete every partition whose name is not in `keep`.
    ///
    /// Returns the deleted names. This is the bulk invalidation step of a
    /// version rollover: the new version lists its partitions and
    /// everything else goes.
    pub async fn retain_only(&self, keep: &[String]) -> Vec<String> {
        let mut partitions = self.partitions.write().await;
        let stale: Vec<String> = partitions
            .keys()
            .filter(|name| !keep.iter().any(|k| k == *name))
            .cloned()
            .collect();
        for name in &stale {
            partitions.remove(name);
            info!(partition = %name, "evicted stale cache partition");
        }
        stale
    }
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Helpers ====================

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
