//! Content-addressed response cache.
//!
//! Responses are keyed by [`RequestFingerprint`]. [`ResponseCache`] serializes
//! work per fingerprint: concurrent requests for the same key wait on one
//! another so the provider is queried at most once, while distinct keys
//! proceed in parallel. Failed computations are never stored.
//!
//! Storage problems degrade the cache to a pass-through (logged as
//! `cache.degraded`) instead of failing the trial.

pub mod fs;
pub mod memory;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::fingerprint::RequestFingerprint;
use crate::metrics::METRICS;
use crate::obs;
use crate::provider::TokenUsage;

pub use fs::FsResponseStore;
pub use memory::{MemoryResponseStore, NullResponseStore};

/// Errors from cache storage.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry for {fingerprint}: {reason}")]
    Corrupt { fingerprint: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// A stored provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub fingerprint: RequestFingerprint,
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub text: String,
    #[serde(default)]
    pub raw: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub created_at: DateTime<Utc>,
}

/// Synchronous key-value storage for cached responses.
///
/// Implementations may block. [`ResponseCache`] calls them on tokio's
/// blocking pool, never on an async worker.
pub trait ResponseStore: Send + Sync {
    /// Look up an entry. A missing entry is `Ok(None)`.
    fn get(&self, fingerprint: &RequestFingerprint) -> Result<Option<CachedResponse>>;

    /// Store an entry. Entries are write-once: an existing entry is kept.
    fn put(&self, entry: &CachedResponse) -> Result<()>;

    /// Number of stored entries.
    fn count(&self) -> Result<usize>;

    /// Remove every entry, returning how many were removed.
    fn clear(&self) -> Result<usize>;
}

/// How the cache participates in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve hits and store misses.
    #[default]
    ReadWrite,
    /// Always query the provider, but still store what comes back.
    WriteOnly,
    /// Neither read nor write.
    Disabled,
}

impl CacheMode {
    pub fn reads(&self) -> bool {
        matches!(self, CacheMode::ReadWrite)
    }

    pub fn writes(&self) -> bool {
        matches!(self, CacheMode::ReadWrite | CacheMode::WriteOnly)
    }
}

/// Result of [`ResponseCache::get_or_compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub response: CachedResponse,
    pub hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub mode: CacheMode,
}

type Slot = Arc<AsyncMutex<()>>;

/// Fingerprint-serialized cache in front of a [`ResponseStore`].
pub struct ResponseCache {
    store: Arc<dyn ResponseStore>,
    mode: CacheMode,
    in_flight: Mutex<HashMap<RequestFingerprint, Slot>>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn ResponseStore>, mode: CacheMode) -> Self {
        Self {
            store,
            mode,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// An in-memory cache, handy for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryResponseStore::new()), CacheMode::ReadWrite)
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    /// Return the stored response for `fingerprint`, or run `compute` and store its result.
    ///
    /// At most one `compute` runs per fingerprint at a time; callers arriving
    /// while one is in flight wait and then observe its stored result.
    /// Errors from `compute` are returned unchanged and nothing is stored.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        fingerprint: &RequestFingerprint,
        compute: F,
    ) -> std::result::Result<CacheLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<CachedResponse, E>>,
    {
        let in_flight = self.enter(fingerprint);
        let _guard = Arc::clone(&in_flight.slot).lock_owned().await;

        if self.mode.reads() {
            match self.load(fingerprint).await {
                Ok(Some(response)) => {
                    METRICS.inc_cache_hits();
                    return Ok(CacheLookup {
                        response,
                        hit: true,
                    });
                }
                Ok(None) => {}
                Err(e) => obs::emit_cache_degraded(fingerprint.short(), "read", &e),
            }
        }

        METRICS.inc_cache_misses();
        let response = compute().await?;

        if self.mode.writes() {
            if let Err(e) = self.save(&response).await {
                obs::emit_cache_degraded(fingerprint.short(), "write", &e);
            }
        }

        Ok(CacheLookup {
            response,
            hit: false,
        })
    }

    async fn load(&self, fingerprint: &RequestFingerprint) -> Result<Option<CachedResponse>> {
        let store = Arc::clone(&self.store);
        let fingerprint = fingerprint.clone();
        tokio::task::spawn_blocking(move || store.get(&fingerprint)).await?
    }

    async fn save(&self, response: &CachedResponse) -> Result<()> {
        let store = Arc::clone(&self.store);
        let entry = response.clone();
        tokio::task::spawn_blocking(move || store.put(&entry)).await?
    }

    pub fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            entries: self.store.count()?,
            mode: self.mode,
        })
    }

    pub fn clear(&self) -> Result<usize> {
        self.store.clear()
    }

    fn enter(&self, fingerprint: &RequestFingerprint) -> InFlight<'_> {
        let mut table = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = Arc::clone(table.entry(fingerprint.clone()).or_default());
        InFlight {
            cache: self,
            fingerprint: fingerprint.clone(),
            slot,
        }
    }
}

/// Registration in the in-flight table; removes the table entry when the
/// last interested caller leaves.
struct InFlight<'a> {
    cache: &'a ResponseCache,
    fingerprint: RequestFingerprint,
    slot: Slot,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut table = self
            .cache
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // One reference held by the table, one by us: nobody else is waiting.
        if Arc::strong_count(&self.slot) == 2 {
            table.remove(&self.fingerprint);
        }
    }
}
