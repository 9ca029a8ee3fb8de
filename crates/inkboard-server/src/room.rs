//! Room registry: one merged document and one presence map per room.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use inkboard_core::storage::{BlobStore, MemoryBlobStore};
use inkboard_core::sync::{AwarenessState, ServerMessage, base64_encode};
use loro::{ExportMode, LoroDoc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::ServerConfig;

/// A relayed message tagged with the sending peer.
pub type RoomEvent = (String, ServerMessage);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Not in a room")]
    NotInRoom,
    #[error("Invalid update payload: {0}")]
    InvalidUpdate(String),
}

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<RoomEvent>,
    /// Connected peers and their presence
    peers: HashMap<String, AwarenessState>,
    /// Every update relayed so far, merged
    doc: LoroDoc,
    has_history: bool,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashMap::new(),
            doc: LoroDoc::new(),
            has_history: false,
        }
    }

    /// Converged room state for late joiners.
    fn initial_sync(&self) -> Option<String> {
        if !self.has_history {
            return None;
        }
        match self.doc.export(ExportMode::Snapshot) {
            Ok(bytes) => Some(base64_encode(&bytes)),
            Err(e) => {
                tracing::warn!("Failed to export room snapshot: {}", e);
                None
            }
        }
    }
}

/// What a peer receives when joining a room.
pub struct Joined {
    pub rx: broadcast::Receiver<RoomEvent>,
    pub initial_sync: Option<String>,
    pub peer_count: usize,
    /// Presence of the other peers
    pub presence: HashMap<String, AwarenessState>,
}

/// Shared application state
pub struct AppState {
    /// Active rooms
    rooms: DashMap<String, Room>,
    /// Board checkpoints served by the HTTP facade
    pub boards: Arc<dyn BlobStore>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryBlobStore::new()))
    }

    pub fn with_store(config: ServerConfig, boards: Arc<dyn BlobStore>) -> Self {
        Self {
            rooms: DashMap::new(),
            boards,
            config,
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }

    /// Add peer to room, creating the room if needed
    pub fn join_room(&self, room_id: &str, peer_id: &str) -> Joined {
        let capacity = self.config.channel_capacity;
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(capacity));
        let presence = room
            .peers
            .iter()
            .filter(|(id, _)| id.as_str() != peer_id)
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        room.peers
            .entry(peer_id.to_string())
            .or_insert_with(AwarenessState::default);
        Joined {
            rx: room.tx.subscribe(),
            initial_sync: room.initial_sync(),
            peer_count: room.peers.len(),
            presence,
        }
    }

    /// Remove peer from room. Empty rooms are evicted.
    pub fn leave_room(&self, room_id: &str, peer_id: &str) {
        let evict = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.peers.remove(peer_id);
                let _ = room.tx.send((
                    peer_id.to_string(),
                    ServerMessage::PeerLeft {
                        peer_id: peer_id.to_string(),
                    },
                ));
                room.peers.is_empty()
            }
            None => false,
        };
        if evict {
            self.evict_if_empty(room_id);
        }
    }

    /// Drop the room if it still has no peers. A peer may have joined
    /// between the leave and this call.
    fn evict_if_empty(&self, room_id: &str) -> bool {
        let evicted = self
            .rooms
            .remove_if(room_id, |_, room| room.peers.is_empty())
            .is_some();
        if evicted {
            info!("Room {} evicted", room_id);
        }
        evicted
    }

    /// Merge an update into the room document and fan it out.
    pub fn apply_update(&self, room_id: &str, peer_id: &str, bytes: &[u8]) -> Result<(), RelayError> {
        let mut room = self.rooms.get_mut(room_id).ok_or(RelayError::NotInRoom)?;
        room.doc
            .import(bytes)
            .map_err(|e| RelayError::InvalidUpdate(e.to_string()))?;
        room.has_history = true;
        debug!("Room {}: {} bytes from {}", room_id, bytes.len(), peer_id);
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::Update {
                from: peer_id.to_string(),
                data: base64_encode(bytes),
            },
        ));
        Ok(())
    }

    /// Record a peer's presence and fan it out.
    pub fn set_presence(
        &self,
        room_id: &str,
        peer_id: &str,
        state: AwarenessState,
    ) -> Result<(), RelayError> {
        let mut room = self.rooms.get_mut(room_id).ok_or(RelayError::NotInRoom)?;
        room.peers.insert(peer_id.to_string(), state.clone());
        let _ = room.tx.send((
            peer_id.to_string(),
            ServerMessage::Awareness {
                from: peer_id.to_string(),
                state,
            },
        ));
        Ok(())
    }

    /// Broadcast message to room
    pub fn broadcast(&self, room_id: &str, from: &str, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.to_string(), msg));
        }
    }
}
