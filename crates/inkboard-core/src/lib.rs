//! InkBoard Core Library
//!
//! Replicated board state for the InkBoard collaborative whiteboard: the
//! Loro-backed document, presence, snapshot undo/redo, checkpoints and the
//! relay protocol.

pub mod canvas;
pub mod chat;
pub mod crdt;
pub mod history;
pub mod presence;
pub mod session;
pub mod shapes;
pub mod storage;
pub mod sync;

pub use canvas::{CanvasView, Snapshot};
pub use chat::ChatMessage;
pub use crdt::{CrdtDocument, DocumentError};
pub use history::HistoryManager;
pub use presence::{PresenceChannel, PresenceField};
pub use session::{BoardSession, Command, CommandOutcome, SessionConfig, SessionError};
pub use shapes::{Shape, Stroke, StrokeMode};
pub use storage::{BlobStore, CheckpointStore, MemoryBlobStore, StorageError};
pub use sync::{
    ClientMessage, ConnectionState, NativeWebSocket, ServerMessage, SyncClient, SyncEvent,
};
