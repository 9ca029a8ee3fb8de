//! Storage abstraction for board checkpoints.
//!
//! Checkpoints go through a plain key/value [`BlobStore`]. The store knows
//! nothing about boards; [`CheckpointStore`] owns the key layout and the
//! payload format.

mod autosave;
mod checkpoint;
mod file;
mod http;
mod memory;

pub use autosave::{AutoSave, DEFAULT_AUTOSAVE_QUIET_MS};
pub use checkpoint::{
    CHECKPOINT_VERSION, CheckpointStore, DEFAULT_CHECKPOINT_TTL, board_key, decode_snapshot,
    encode_snapshot,
};
pub use file::FileBlobStore;
pub use http::HttpBlobStore;
pub use memory::MemoryBlobStore;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Refusing to store an empty payload")]
    EmptyPayload,
    #[error("Storage error: {0}")]
    Other(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Http(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future for async operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Key/value blob backend.
///
/// Implementations can keep blobs in memory, on disk, or behind the board
/// HTTP facade.
pub trait BlobStore: Send + Sync {
    /// Fetch a blob. Missing or expired keys yield `None`.
    fn get(&self, key: &str) -> BoxFuture<'_, StorageResult<Option<Vec<u8>>>>;

    /// Store a blob, optionally expiring after `ttl`.
    fn set(&self, key: &str, bytes: Vec<u8>, ttl: Option<Duration>)
    -> BoxFuture<'_, StorageResult<()>>;

    /// Remove a blob. Removing a missing key is not an error.
    fn del(&self, key: &str) -> BoxFuture<'_, StorageResult<()>>;
}

#[cfg(test)]
pub(crate) fn block_on<F: Future>(f: F) -> F::Output {
    pollster::block_on(f)
}
