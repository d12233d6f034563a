//! In-memory metamodel cache with per-entry TTL, and the single-flight guard
//! that keeps concurrent builds of the same key from running twice.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::model::Metamodel;
use crate::traits::MetamodelCache;

/// Cache entry wrapping a metamodel with TTL metadata.
#[derive(Debug, Clone)]
pub struct CachedMetamodel {
    /// The cached metamodel.
    pub model: Arc<Metamodel>,
    /// When this cache entry expires.
    pub expires_at: DateTime<Utc>,
}

/// Cache statistics for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cached entries.
    pub total_count: usize,
    /// Number of expired entries still in cache.
    pub expired_count: usize,
}

/// In-memory TTL cache for metamodels.
#[derive(Debug, Default)]
pub struct InMemoryMetamodelCache {
    entries: RwLock<HashMap<String, CachedMetamodel>>,
}

impl InMemoryMetamodelCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all expired entries from the cache.
    pub async fn clear_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, cached| cached.expires_at > now);
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.entries.read().await;
        CacheStats {
            total_count: entries.len(),
            expired_count: entries.values().filter(|c| c.expires_at <= now).count(),
        }
    }
}

#[async_trait]
impl MetamodelCache for InMemoryMetamodelCache {
    async fn get(&self, key: &str) -> Option<Arc<Metamodel>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|cached| Utc::now() < cached.expires_at)
            .map(|cached| cached.model.clone())
    }

    async fn store(&self, key: &str, model: Arc<Metamodel>, ttl: Duration) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CachedMetamodel { model, expires_at });
        debug!(key = %key, expires_at = %expires_at, "Metamodel cached");
    }

    async fn invalidate(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }
}

/// Per-key mutual exclusion for builds.
///
/// The first caller for a key runs; later callers wait on the same lock and,
/// once admitted, are expected to re-check the cache before building.
#[derive(Debug, Default)]
pub struct SingleFlight {
    flights: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SingleFlight {
    /// Create an empty guard set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other flight for `key` is running, then claim it.
    pub async fn acquire(&self, key: &str) -> FlightGuard<'_> {
        let lock = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            flights.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        FlightGuard {
            owner: self,
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Number of keys with a running or waiting flight.
    pub fn in_flight(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Claim on a single-flight key, released on drop.
pub struct FlightGuard<'a> {
    owner: &'a SingleFlight,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self
            .owner
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map and this guard still reference the lock: nobody waits.
        if flights
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            flights.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for FlightGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGuard").field("key", &self.key).finish()
    }
}
