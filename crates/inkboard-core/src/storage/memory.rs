//! In-memory blob store.

use super::{BlobStore, BoxFuture, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// In-memory storage for tests and for the relay's board facade.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Entry>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live blobs.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.blobs
            .read()
            .map(|blobs| blobs.values().filter(|e| e.is_live(now)).count())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) -> StorageResult<usize> {
        let now = Instant::now();
        let mut blobs = self.blobs.write().map_err(lock_error)?;
        let before = blobs.len();
        blobs.retain(|_, e| e.is_live(now));
        Ok(before - blobs.len())
    }
}

fn lock_error<T>(e: std::sync::PoisonError<T>) -> StorageError {
    StorageError::Other(format!("Lock error: {}", e))
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> BoxFuture<'_, StorageResult<Option<Vec<u8>>>> {
        let key = key.to_string();
        Box::pin(async move {
            let blobs = self.blobs.read().map_err(lock_error)?;
            Ok(blobs
                .get(&key)
                .filter(|e| e.is_live(Instant::now()))
                .map(|e| e.bytes.clone()))
        })
    }

    fn set(
        &self,
        key: &str,
        bytes: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
            let mut blobs = self.blobs.write().map_err(lock_error)?;
            blobs.insert(key, Entry { bytes, expires_at });
            Ok(())
        })
    }

    fn del(&self, key: &str) -> BoxFuture<'_, StorageResult<()>> {
        let key = key.to_string();
        Box::pin(async move {
            let mut blobs = self.blobs.write().map_err(lock_error)?;
            blobs.remove(&key);
            Ok(())
        })
    }
}
