//! Board checkpoints on top of a [`BlobStore`].

use super::{BlobStore, StorageError, StorageResult};
use crate::canvas::Snapshot;
use crate::shapes::{Shape, Stroke};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Payload format version written by [`encode_snapshot`].
pub const CHECKPOINT_VERSION: u32 = 1;

/// Checkpoints expire after a week without saves.
pub const DEFAULT_CHECKPOINT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub(crate) const BOARD_KEY_PREFIX: &str = "board:";

/// Blob key of a room's checkpoint.
pub fn board_key(room: &str) -> String {
    format!("{}{}", BOARD_KEY_PREFIX, room)
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    version: u32,
    strokes: &'a [Stroke],
    shapes: &'a [Shape],
}

#[derive(Deserialize)]
struct Payload {
    version: u32,
    #[serde(default)]
    strokes: Vec<Stroke>,
    #[serde(default)]
    shapes: Vec<Shape>,
}

/// Serialize a snapshot as `{version, strokes, shapes}` JSON.
pub fn encode_snapshot(snapshot: &Snapshot) -> StorageResult<Vec<u8>> {
    let payload = PayloadRef {
        version: CHECKPOINT_VERSION,
        strokes: &snapshot.strokes,
        shapes: &snapshot.shapes,
    };
    Ok(serde_json::to_vec(&payload)?)
}

/// Parse a checkpoint payload, checking its version.
pub fn decode_snapshot(bytes: &[u8]) -> StorageResult<Snapshot> {
    let payload: Payload = serde_json::from_slice(bytes)?;
    if payload.version != CHECKPOINT_VERSION {
        return Err(StorageError::Serialization(format!(
            "Unsupported checkpoint version {}",
            payload.version
        )));
    }
    Ok(Snapshot::new(payload.strokes, payload.shapes))
}

/// Saves and restores whole boards under `board:{room}`.
pub struct CheckpointStore<S: BlobStore> {
    store: Arc<S>,
    ttl: Option<Duration>,
}

impl<S: BlobStore> CheckpointStore<S> {
    /// Create a checkpoint store with the default seven day TTL.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ttl: Some(DEFAULT_CHECKPOINT_TTL),
        }
    }

    /// Override the TTL. `None` keeps checkpoints forever.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist a snapshot. Returns the payload size in bytes.
    pub async fn save(&self, room: &str, snapshot: &Snapshot) -> StorageResult<usize> {
        let bytes = encode_snapshot(snapshot)?;
        if bytes.is_empty() {
            return Err(StorageError::EmptyPayload);
        }
        let size = bytes.len();
        self.store.set(&board_key(room), bytes, self.ttl).await?;
        log::debug!("Saved checkpoint for room {} ({} bytes)", room, size);
        Ok(size)
    }

    /// Load a room's checkpoint.
    ///
    /// A missing, unreadable or unrecognized checkpoint yields `None`; the
    /// board then starts empty.
    pub async fn load(&self, room: &str) -> Option<Snapshot> {
        let bytes = match self.store.get(&board_key(room)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Failed to load checkpoint for room {}: {}", room, e);
                return None;
            }
        };
        match decode_snapshot(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("Ignoring checkpoint for room {}: {}", room, e);
                None
            }
        }
    }

    /// Remove a room's checkpoint.
    pub async fn delete(&self, room: &str) -> StorageResult<()> {
        self.store.del(&board_key(room)).await
    }
}
