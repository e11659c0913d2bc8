use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{CachedResponse, ResponseStore, Result};
use crate::fingerprint::RequestFingerprint;

/// In-memory response store.
#[derive(Debug, Default)]
pub struct MemoryResponseStore {
    entries: Mutex<HashMap<RequestFingerprint, CachedResponse>>,
}

impl MemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<RequestFingerprint, CachedResponse>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResponseStore for MemoryResponseStore {
    fn get(&self, fingerprint: &RequestFingerprint) -> Result<Option<CachedResponse>> {
        Ok(self.entries().get(fingerprint).cloned())
    }

    fn put(&self, entry: &CachedResponse) -> Result<()> {
        self.entries()
            .entry(entry.fingerprint.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries().len())
    }

    fn clear(&self) -> Result<usize> {
        let mut entries = self.entries();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

/// A store that remembers nothing. Used when the cache directory is unusable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullResponseStore;

impl ResponseStore for NullResponseStore {
    fn get(&self, _fingerprint: &RequestFingerprint) -> Result<Option<CachedResponse>> {
        Ok(None)
    }

    fn put(&self, _entry: &CachedResponse) -> Result<()> {
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(0)
    }

    fn clear(&self) -> Result<usize> {
        Ok(0)
    }
}
