//! Board session: one replica's document, history, presence and relay queue.
//!
//! The session is single-threaded and performs no I/O itself. The caller
//! feeds it relay events, drains [`BoardSession::take_outgoing`] into the
//! socket and runs checkpoint saves when asked to.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::canvas::{CanvasView, Snapshot};
use crate::chat::{CHAT_DISPLAY_LIMIT, ChatMessage};
use crate::crdt::{CrdtDocument, DocumentError, VersionVector};
use crate::history::{DEFAULT_HISTORY_LIMIT, HistoryManager};
use crate::presence::{PresenceChannel, PresenceField, RemoteCursor};
use crate::shapes::{RecordId, Shape, Stroke, StrokeMode};
use crate::storage::{
    AutoSave, BlobStore, CheckpointStore, DEFAULT_AUTOSAVE_QUIET_MS, DEFAULT_CHECKPOINT_TTL,
    StorageError, encode_snapshot,
};
use crate::sync::{
    ClientMessage, CursorPosition, DEFAULT_COLOR, DEFAULT_NAME, ServerMessage, SyncEvent,
    base64_encode,
};

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Unknown shape: {0}")]
    UnknownShape(String),
    #[error("Shape {0} is not a text box")]
    NotText(String),
    #[error("Not in a room")]
    NotInRoom,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Entries kept on each of the undo and redo stacks.
    pub history_limit: usize,
    /// Chat messages returned by [`BoardSession::chat`].
    pub chat_display_limit: usize,
    /// Quiet period before an automatic checkpoint.
    pub autosave_quiet: Duration,
    /// Checkpoint retention; `None` keeps them forever.
    pub checkpoint_ttl: Option<Duration>,
    pub user_name: String,
    pub user_color: String,
    /// Whether `Clear` also asks for the room's checkpoint to be deleted.
    pub delete_checkpoint_on_clear: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            chat_display_limit: CHAT_DISPLAY_LIMIT,
            autosave_quiet: Duration::from_millis(DEFAULT_AUTOSAVE_QUIET_MS),
            checkpoint_ttl: Some(DEFAULT_CHECKPOINT_TTL),
            user_name: DEFAULT_NAME.to_string(),
            user_color: DEFAULT_COLOR.to_string(),
            delete_checkpoint_on_clear: false,
        }
    }
}

/// Board-level commands, typically bound to toolbar buttons and shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Undo,
    Redo,
    Duplicate,
    Delete,
    Clear,
    Export,
    Save,
}

/// Result of [`BoardSession::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The canvas changed.
    Applied,
    /// Nothing to do (empty stack, no selection).
    Unchanged,
    /// JSON export of the current canvas.
    Exported(String),
    /// The caller should write a checkpoint now.
    SaveRequested,
    /// The canvas was cleared and the caller should delete the checkpoint.
    CheckpointDeleteRequested,
}

/// One participant's view of a board.
pub struct BoardSession {
    config: SessionConfig,
    doc: CrdtDocument,
    /// Re-derived by document observers after every change.
    view: Rc<RefCell<CanvasView>>,
    /// Set by observers when strokes or shapes changed.
    canvas_changed: Rc<Cell<bool>>,
    history: HistoryManager,
    presence: PresenceChannel,
    autosave: AutoSave,
    room: Option<String>,
    /// Id the relay assigned to this connection.
    peer_id: Option<String>,
    connected: bool,
    /// The relay acknowledged the join of `room`.
    joined: bool,
    outgoing: Vec<ClientMessage>,
}

impl BoardSession {
    pub fn new(config: SessionConfig) -> Self {
        let view = Rc::new(RefCell::new(CanvasView::new()));
        let canvas_changed = Rc::new(Cell::new(false));
        let mut doc = CrdtDocument::new();
        attach_view(&mut doc, &view, &canvas_changed);

        Self {
            history: HistoryManager::new(config.history_limit),
            presence: PresenceChannel::new(config.user_name.clone(), config.user_color.clone()),
            autosave: AutoSave::new(config.autosave_quiet),
            config,
            doc,
            view,
            canvas_changed,
            room: None,
            peer_id: None,
            connected: false,
            joined: false,
            outgoing: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn document(&self) -> &CrdtDocument {
        &self.doc
    }

    pub fn view(&self) -> Ref<'_, CanvasView> {
        self.view.borrow()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn presence(&self) -> &PresenceChannel {
        &self.presence
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the relay confirmed the current room.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Current strokes and shapes.
    pub fn snapshot(&self) -> Snapshot {
        self.view.borrow().snapshot()
    }

    pub fn strokes(&self) -> Vec<Stroke> {
        self.view.borrow().strokes.clone()
    }

    pub fn shapes(&self) -> Vec<Shape> {
        self.view.borrow().shapes.clone()
    }

    /// The most recent chat messages, oldest first.
    pub fn chat(&self) -> Vec<ChatMessage> {
        self.view
            .borrow()
            .recent_chat(self.config.chat_display_limit)
            .to_vec()
    }

    pub fn cursors(&self) -> Vec<RemoteCursor> {
        self.presence.cursors()
    }

    // --- Room lifecycle ---

    /// Enter a room. Switching rooms starts from an empty board.
    pub fn join(&mut self, room: &str) {
        if self.room.as_deref() == Some(room) {
            return;
        }
        if self.room.is_some() {
            self.leave();
        }
        log::info!("Joining room {}", room);
        self.room = Some(room.to_string());
        if self.connected {
            self.outgoing.push(ClientMessage::Join {
                room: room.to_string(),
            });
        }
    }

    /// Leave the current room and drop its board, history and presence.
    pub fn leave(&mut self) {
        let Some(room) = self.room.take() else {
            return;
        };
        log::info!("Leaving room {}", room);
        if self.connected && self.joined {
            self.outgoing.push(ClientMessage::Leave);
        }
        self.joined = false;
        self.peer_id = None;
        self.history.reset();
        self.presence.reset();
        self.autosave.saved();
        self.reset_document();
    }

    fn reset_document(&mut self) {
        let mut doc = CrdtDocument::new();
        *self.view.borrow_mut() = CanvasView::new();
        attach_view(&mut doc, &self.view, &self.canvas_changed);
        self.doc = doc;
        self.canvas_changed.set(false);
    }

    /// The relay connection is up. Re-joins the current room.
    pub fn on_connected(&mut self) {
        self.connected = true;
        if let Some(room) = &self.room {
            self.outgoing.push(ClientMessage::Join { room: room.clone() });
        }
    }

    /// The relay connection dropped. The board is kept; presence is not.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.joined = false;
        self.peer_id = None;
        self.outgoing.clear();
        self.presence.reset();
    }

    /// Apply a frame received from the relay.
    pub fn handle_message(&mut self, msg: ServerMessage) -> SessionResult<()> {
        match SyncEvent::from_server(msg) {
            Some(event) => self.handle_event(event),
            None => Ok(()),
        }
    }

    /// Apply an event from the WebSocket client.
    pub fn handle_event(&mut self, event: SyncEvent) -> SessionResult<()> {
        match event {
            SyncEvent::Connected => self.on_connected(),
            SyncEvent::Disconnected => self.on_disconnected(),
            SyncEvent::JoinedRoom {
                room,
                peer_id,
                peer_count,
                initial_sync,
                mut presence,
            } => {
                if self.room.as_deref() != Some(room.as_str()) {
                    log::warn!("Ignoring join confirmation for stale room {}", room);
                    return Ok(());
                }
                log::info!("Joined room {} as {} ({} peers)", room, peer_id, peer_count);
                let mut relay_version = VersionVector::default();
                if let Some(bytes) = initial_sync {
                    match CrdtDocument::blob_version(&bytes) {
                        Ok(version) => relay_version = version,
                        Err(e) => log::warn!("Unreadable room version, sending full state: {}", e),
                    }
                    let status = self.doc.import(&bytes)?;
                    self.after_change();
                    if status.pending.is_some() {
                        log::warn!("Room state of {} is missing dependencies", room);
                    }
                }
                presence.remove(&peer_id);
                self.presence.set_local_id(Some(peer_id.clone()));
                self.presence.replace_remote(presence);
                self.presence.mark_dirty();
                self.peer_id = Some(peer_id);
                self.joined = true;
                self.resync(&relay_version)?;
            }
            SyncEvent::PeerJoined { peer_id } => self.presence.add_peer(&peer_id),
            SyncEvent::PeerLeft { peer_id } => self.presence.remove_peer(&peer_id),
            SyncEvent::UpdateReceived { from, data } => {
                log::debug!("Update from {} ({} bytes)", from, data.len());
                // Local work goes out first so it is not folded into the remote import.
                self.flush()?;
                let status = self.doc.import(&data)?;
                if self.joined {
                    self.doc.mark_synced();
                }
                self.after_change();
                if status.pending.is_some() {
                    log::warn!("Update from {} depends on ops never received", from);
                    self.request_resync();
                }
            }
            SyncEvent::AwarenessReceived { from, state } => {
                if self.peer_id.as_deref() != Some(from.as_str()) {
                    self.presence.apply_remote(&from, state);
                }
            }
            SyncEvent::ResyncRequired { missed } => {
                log::warn!("Relay dropped {} messages for this replica", missed);
                self.request_resync();
            }
            SyncEvent::Error { message } => log::warn!("Relay error: {}", message),
        }
        Ok(())
    }

    /// Rejoin the current room to receive its merged state again. Local
    /// changes made meanwhile are sent after the join is confirmed.
    fn request_resync(&mut self) {
        if !self.connected || !self.joined {
            return;
        }
        let Some(room) = self.room.clone() else {
            return;
        };
        log::info!("Rejoining room {} to resync", room);
        self.joined = false;
        self.outgoing.push(ClientMessage::Join { room });
    }

    /// Send what the relay is missing after (re)joining: every local op not
    /// covered by `relay_version`. Imports are idempotent, so overlap with
    /// what peers already have is harmless.
    fn resync(&mut self, relay_version: &VersionVector) -> SessionResult<()> {
        if self.doc.version() != *relay_version {
            let bytes = self.doc.export_updates(relay_version)?;
            self.outgoing.push(ClientMessage::Update {
                data: base64_encode(&bytes),
            });
        }
        self.doc.mark_synced();
        self.flush()
    }

    /// Queue pending document updates and presence for the relay.
    fn flush(&mut self) -> SessionResult<()> {
        if !self.joined {
            return Ok(());
        }
        if let Some(bytes) = self.doc.take_local_updates()? {
            self.outgoing.push(ClientMessage::Update {
                data: base64_encode(&bytes),
            });
        }
        if let Some(msg) = self.presence.take_broadcast() {
            self.outgoing.push(msg);
        }
        Ok(())
    }

    fn after_change(&mut self) {
        if self.canvas_changed.replace(false) && self.room.is_some() {
            self.autosave.mark_dirty();
        }
        self.view.borrow_mut().prune_selection();
    }

    /// Drain messages waiting to be sent to the relay.
    pub fn take_outgoing(&mut self) -> Vec<ClientMessage> {
        std::mem::take(&mut self.outgoing)
    }

    /// Drain outgoing messages as JSON text frames.
    pub fn take_outgoing_json(&mut self) -> Vec<String> {
        self.take_outgoing()
            .iter()
            .filter_map(|msg| match serde_json::to_string(msg) {
                Ok(json) => Some(json),
                Err(e) => {
                    log::error!("Failed to encode outgoing message: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Presence ---

    /// Update the local cursor; `None` when the pointer leaves the canvas.
    pub fn set_cursor(&mut self, cursor: Option<(f64, f64)>) -> SessionResult<()> {
        let cursor = cursor.map(|(x, y)| CursorPosition { x, y });
        self.presence.set_local(PresenceField::Cursor(cursor));
        self.flush()
    }

    pub fn set_user(&mut self, name: &str, color: &str) -> SessionResult<()> {
        self.config.user_name = name.to_string();
        self.config.user_color = color.to_string();
        self.presence.set_local(PresenceField::Name(name.to_string()));
        self.presence.set_local(PresenceField::Color(color.to_string()));
        self.flush()
    }

    // --- Selection ---

    /// Select a shape, or clear the selection. Returns false for unknown ids.
    pub fn select(&mut self, id: Option<&str>) -> bool {
        let mut view = self.view.borrow_mut();
        match id {
            Some(id) if view.get_shape(id).is_some() => {
                view.selected = Some(id.to_string());
                true
            }
            Some(_) => false,
            None => {
                view.selected = None;
                true
            }
        }
    }

    pub fn selected(&self) -> Option<Shape> {
        self.view.borrow().selected_shape().cloned()
    }

    // --- Canvas mutations ---

    /// Apply a document change preceded by a history entry.
    fn mutate(
        &mut self,
        f: impl FnOnce(&mut CrdtDocument) -> Result<(), DocumentError>,
    ) -> SessionResult<()> {
        let current = self.snapshot();
        self.history.record_before_mutation(current);
        f(&mut self.doc)?;
        self.after_change();
        self.flush()
    }

    /// Overwrite strokes and shapes with `snapshot` as one history step.
    fn write_all(&mut self, snapshot: Snapshot) -> SessionResult<()> {
        self.mutate(|doc| doc.restore(&snapshot))
    }

    /// Start a local stroke. It is not shared until committed.
    pub fn begin_stroke(&mut self, x: f64, y: f64, color: &str, width: f64, mode: StrokeMode) {
        self.view.borrow_mut().drawing = Some(Stroke::begin(x, y, color, width, mode));
    }

    pub fn extend_stroke(&mut self, x: f64, y: f64) {
        if let Some(stroke) = self.view.borrow_mut().drawing.as_mut() {
            stroke.push_point(x, y);
        }
    }

    /// Abandon the stroke in progress.
    pub fn cancel_stroke(&mut self) {
        self.view.borrow_mut().drawing = None;
    }

    /// Append the stroke in progress to the board.
    pub fn commit_stroke(&mut self) -> SessionResult<Option<RecordId>> {
        let Some(stroke) = self.view.borrow_mut().drawing.take() else {
            return Ok(None);
        };
        let id = stroke.id.clone();
        self.mutate(|doc| doc.append(&stroke))?;
        Ok(Some(id))
    }

    /// Add a new shape and select it.
    pub fn add_shape(&mut self, shape: Shape) -> SessionResult<RecordId> {
        let shape = shape.normalized();
        let id = shape.id().to_string();
        self.mutate(|doc| doc.append(&shape))?;
        self.view.borrow_mut().selected = Some(id.clone());
        Ok(id)
    }

    fn existing_shape(&self, id: &str) -> SessionResult<Shape> {
        let shape = self.view.borrow().get_shape(id).cloned();
        shape.ok_or_else(|| SessionError::UnknownShape(id.to_string()))
    }

    /// Replace a shape, keeping its position in the stacking order.
    pub fn update_shape(&mut self, shape: Shape) -> SessionResult<()> {
        let existing = self.existing_shape(shape.id())?;
        if existing == shape {
            return Ok(());
        }
        let mut snapshot = self.snapshot();
        for slot in snapshot.shapes.iter_mut() {
            if slot.id() == shape.id() {
                *slot = shape.clone();
            }
        }
        self.write_all(snapshot)
    }

    pub fn move_shape(&mut self, id: &str, dx: f64, dy: f64) -> SessionResult<()> {
        let mut shape = self.existing_shape(id)?;
        shape.translate(dx, dy);
        self.update_shape(shape)
    }

    /// Change the content of a text box.
    pub fn edit_text(&mut self, id: &str, text: &str) -> SessionResult<()> {
        match self.existing_shape(id)? {
            Shape::Text(mut t) => {
                t.set_text(text);
                self.update_shape(Shape::Text(t))
            }
            _ => Err(SessionError::NotText(id.to_string())),
        }
    }

    /// Remove the selected shape. Returns false without a selection.
    pub fn delete_selected(&mut self) -> SessionResult<bool> {
        let Some(selected) = self.selected() else {
            return Ok(false);
        };
        let mut snapshot = self.snapshot();
        snapshot.shapes.retain(|s| s.id() != selected.id());
        self.write_all(snapshot)?;
        self.view.borrow_mut().selected = None;
        Ok(true)
    }

    /// Copy the selected shape and select the copy.
    pub fn duplicate_selected(&mut self) -> SessionResult<Option<RecordId>> {
        let Some(selected) = self.selected() else {
            return Ok(None);
        };
        let copy = selected.duplicate();
        let id = copy.id().to_string();
        self.mutate(|doc| doc.append(&copy))?;
        self.view.borrow_mut().selected = Some(id.clone());
        Ok(Some(id))
    }

    /// Remove every stroke and shape. Undoable; chat is kept.
    pub fn clear(&mut self) -> SessionResult<()> {
        self.write_all(Snapshot::default())?;
        self.view.borrow_mut().selected = None;
        Ok(())
    }

    pub fn undo(&mut self) -> SessionResult<bool> {
        let current = self.snapshot();
        let Some(previous) = self.history.undo(current) else {
            return Ok(false);
        };
        self.doc.restore(&previous)?;
        self.after_change();
        self.flush()?;
        Ok(true)
    }

    pub fn redo(&mut self) -> SessionResult<bool> {
        let current = self.snapshot();
        let Some(next) = self.history.redo(current) else {
            return Ok(false);
        };
        self.doc.restore(&next)?;
        self.after_change();
        self.flush()?;
        Ok(true)
    }

    /// Post a chat message as the local user. Blank messages are ignored.
    pub fn send_chat(&mut self, text: &str) -> SessionResult<Option<ChatMessage>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let local = self.presence.local();
        let message = ChatMessage::new(local.name.clone(), text, local.color.clone());
        self.doc.append(&message)?;
        self.after_change();
        self.flush()?;
        Ok(Some(message))
    }

    /// JSON export of the current canvas.
    pub fn export_json(&self) -> SessionResult<String> {
        let bytes = encode_snapshot(&self.snapshot())?;
        String::from_utf8(bytes)
            .map_err(|e| SessionError::Storage(StorageError::Serialization(e.to_string())))
    }

    /// Run a board command.
    pub fn dispatch(&mut self, command: Command) -> SessionResult<CommandOutcome> {
        let changed = |applied: bool| {
            if applied {
                CommandOutcome::Applied
            } else {
                CommandOutcome::Unchanged
            }
        };
        let outcome = match command {
            Command::Undo => changed(self.undo()?),
            Command::Redo => changed(self.redo()?),
            Command::Duplicate => changed(self.duplicate_selected()?.is_some()),
            Command::Delete => changed(self.delete_selected()?),
            Command::Clear => {
                self.clear()?;
                if self.config.delete_checkpoint_on_clear && self.room.is_some() {
                    CommandOutcome::CheckpointDeleteRequested
                } else {
                    CommandOutcome::Applied
                }
            }
            Command::Export => CommandOutcome::Exported(self.export_json()?),
            Command::Save => CommandOutcome::SaveRequested,
        };
        Ok(outcome)
    }

    // --- Checkpoints ---

    /// A checkpoint store over `store` using this session's TTL.
    pub fn checkpoint_store<S: BlobStore>(&self, store: Arc<S>) -> CheckpointStore<S> {
        CheckpointStore::new(store).with_ttl(self.config.checkpoint_ttl)
    }

    /// Seed an empty board from a checkpoint. Not undoable. Returns whether
    /// the board was seeded.
    pub fn seed_from_checkpoint(&mut self, snapshot: &Snapshot) -> SessionResult<bool> {
        if !self.doc.is_canvas_empty() || snapshot.is_empty() {
            return Ok(false);
        }
        self.doc.restore(snapshot)?;
        self.after_change();
        // The board matches the checkpoint; nothing to save yet.
        self.autosave.saved();
        self.flush()?;
        Ok(true)
    }

    /// Load the room's checkpoint and seed the board with it if still empty.
    pub async fn restore_checkpoint<S: BlobStore>(
        &mut self,
        store: &CheckpointStore<S>,
    ) -> SessionResult<bool> {
        let room = self.room.clone().ok_or(SessionError::NotInRoom)?;
        match store.load(&room).await {
            Some(snapshot) => self.seed_from_checkpoint(&snapshot),
            None => Ok(false),
        }
    }

    /// Write the room's checkpoint now.
    pub async fn save_checkpoint<S: BlobStore>(
        &mut self,
        store: &CheckpointStore<S>,
    ) -> SessionResult<usize> {
        let room = self.room.clone().ok_or(SessionError::NotInRoom)?;
        let size = store.save(&room, &self.snapshot()).await?;
        self.autosave.saved();
        Ok(size)
    }

    /// Delete the room's checkpoint.
    pub async fn delete_checkpoint<S: BlobStore>(
        &mut self,
        store: &CheckpointStore<S>,
    ) -> SessionResult<()> {
        let room = self.room.clone().ok_or(SessionError::NotInRoom)?;
        store.delete(&room).await?;
        self.autosave.saved();
        Ok(())
    }

    /// Whether the autosave quiet period has elapsed with unsaved changes.
    pub fn autosave_due(&self, now: Instant) -> bool {
        self.room.is_some() && self.autosave.should_save_at(now)
    }

    /// Save if the debounce period has elapsed. Failures are logged and
    /// retried on the next change.
    pub async fn autosave<S: BlobStore>(
        &mut self,
        store: &CheckpointStore<S>,
        now: Instant,
    ) -> Option<usize> {
        if !self.autosave_due(now) {
            return None;
        }
        match self.save_checkpoint(store).await {
            Ok(size) => Some(size),
            Err(e) => {
                log::warn!("Autosave failed: {}", e);
                self.autosave.saved_at(now);
                None
            }
        }
    }
}

impl Default for BoardSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

fn attach_view(doc: &mut CrdtDocument, view: &Rc<RefCell<CanvasView>>, changed: &Rc<Cell<bool>>) {
    let (v, c) = (view.clone(), changed.clone());
    doc.observe_strokes(move |strokes| {
        v.borrow_mut().strokes = strokes.to_vec();
        c.set(true);
    });
    let (v, c) = (view.clone(), changed.clone());
    doc.observe_shapes(move |shapes| {
        v.borrow_mut().shapes = shapes.to_vec();
        c.set(true);
    });
    let v = view.clone();
    doc.observe_chat(move |chat| {
        v.borrow_mut().chat = chat.to_vec();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{BoxShape, TextShape};
    use crate::storage::MemoryBlobStore;
    use crate::sync::{AwarenessState, base64_decode};
    use std::collections::HashMap;

    fn rect(x: f64) -> Shape {
        Shape::Rect(BoxShape::new(x, 0.0, 10.0, 10.0, "#f00"))
    }

    fn joined(room: &str, peer_id: &str) -> ServerMessage {
        ServerMessage::Joined {
            room: room.to_string(),
            peer_id: peer_id.to_string(),
            peer_count: 1,
            initial_sync: None,
            presence: HashMap::new(),
        }
    }

    fn connected_session(room: &str, peer_id: &str) -> BoardSession {
        let mut session = BoardSession::default();
        session.on_connected();
        session.join(room);
        session.handle_message(joined(room, peer_id)).unwrap();
        session.take_outgoing();
        session
    }

    /// Deliver `from`'s outgoing updates to `to` the way the relay would.
    fn relay(from: &mut BoardSession, to: &mut BoardSession) {
        let sender = from.peer_id().unwrap_or_default().to_string();
        for msg in from.take_outgoing() {
            let frame = match msg {
                ClientMessage::Update { data } => ServerMessage::Update {
                    from: sender.clone(),
                    data,
                },
                ClientMessage::Awareness { state } => ServerMessage::Awareness {
                    from: sender.clone(),
                    state,
                },
                _ => continue,
            };
            to.handle_message(frame).unwrap();
        }
    }

    #[test]
    fn test_undo_removes_shape_and_redo_restores_it() {
        let mut session = BoardSession::default();
        let id = session.add_shape(rect(0.0)).unwrap();
        assert_eq!(session.shapes().len(), 1);

        assert_eq!(session.dispatch(Command::Undo).unwrap(), CommandOutcome::Applied);
        assert!(session.shapes().is_empty());
        assert_eq!(session.history().redo_count(), 1);
        assert!(session.selected().is_none());

        assert_eq!(session.dispatch(Command::Redo).unwrap(), CommandOutcome::Applied);
        assert_eq!(session.shapes()[0].id(), id);
    }

    #[test]
    fn test_undo_on_empty_history_is_silent() {
        let mut session = BoardSession::default();
        assert_eq!(session.dispatch(Command::Undo).unwrap(), CommandOutcome::Unchanged);
        assert_eq!(session.dispatch(Command::Redo).unwrap(), CommandOutcome::Unchanged);
    }

    #[test]
    fn test_new_mutation_invalidates_redo() {
        let mut session = BoardSession::default();
        session.add_shape(rect(0.0)).unwrap();
        session.undo().unwrap();
        assert!(session.history().can_redo());

        session.add_shape(rect(5.0)).unwrap();
        assert!(!session.history().can_redo());
    }

    #[test]
    fn test_stroke_lifecycle() {
        let mut session = BoardSession::default();
        session.begin_stroke(0.0, 0.0, "#000", 4.0, StrokeMode::Draw);
        session.extend_stroke(1.0, 1.0);
        session.extend_stroke(2.0, 3.0);

        // In progress: visible locally, not in the document
        assert_eq!(session.view().visible_strokes().count(), 1);
        assert!(session.document().strokes().is_empty());

        let id = session.commit_stroke().unwrap().unwrap();
        let strokes = session.document().strokes();
        assert_eq!(strokes[0].id, id);
        assert_eq!(strokes[0].point_count(), 3);
        assert!(session.view().drawing.is_none());
        assert_eq!(session.commit_stroke().unwrap(), None);
    }

    #[test]
    fn test_move_and_edit_keep_order() {
        let mut session = BoardSession::default();
        let a = session.add_shape(rect(0.0)).unwrap();
        let text = session
            .add_shape(Shape::Text(TextShape::new(5.0, 5.0, "#000")))
            .unwrap();
        let c = session.add_shape(rect(20.0)).unwrap();

        session.move_shape(&a, 3.0, 4.0).unwrap();
        session.edit_text(&text, "hello\n").unwrap();

        let shapes = session.shapes();
        let ids: Vec<&str> = shapes.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![a.as_str(), text.as_str(), c.as_str()]);
        match &shapes[0] {
            Shape::Rect(b) => assert_eq!((b.x, b.y), (3.0, 4.0)),
            _ => panic!("Expected rect"),
        }
        match &shapes[1] {
            Shape::Text(t) => assert_eq!(t.text, "hello"),
            _ => panic!("Expected text"),
        }
        assert!(matches!(
            session.edit_text(&a, "x"),
            Err(SessionError::NotText(_))
        ));
        assert!(matches!(
            session.move_shape("missing", 1.0, 1.0),
            Err(SessionError::UnknownShape(_))
        ));
    }

    #[test]
    fn test_duplicate_and_delete_selected() {
        let mut session = BoardSession::default();
        let original = session.add_shape(rect(0.0)).unwrap();

        let copy = session.dispatch(Command::Duplicate).unwrap();
        assert_eq!(copy, CommandOutcome::Applied);
        assert_eq!(session.shapes().len(), 2);
        let selected = session.selected().unwrap();
        assert_ne!(selected.id(), original);
        match selected {
            Shape::Rect(b) => assert_eq!((b.x, b.y), (12.0, 12.0)),
            _ => panic!("Expected rect"),
        }

        assert_eq!(session.dispatch(Command::Delete).unwrap(), CommandOutcome::Applied);
        assert_eq!(session.shapes().len(), 1);
        assert_eq!(session.shapes()[0].id(), original);
        assert_eq!(session.dispatch(Command::Delete).unwrap(), CommandOutcome::Unchanged);
    }

    #[test]
    fn test_clear_is_undoable_and_keeps_checkpoint_by_default() {
        let mut session = connected_session("r1", "a");
        session.add_shape(rect(0.0)).unwrap();
        session.send_chat("hi").unwrap();

        assert_eq!(session.dispatch(Command::Clear).unwrap(), CommandOutcome::Applied);
        assert!(session.snapshot().is_empty());
        assert_eq!(session.chat().len(), 1);

        session.undo().unwrap();
        assert_eq!(session.shapes().len(), 1);
    }

    #[test]
    fn test_clear_can_request_checkpoint_delete() {
        let mut session = BoardSession::new(SessionConfig {
            delete_checkpoint_on_clear: true,
            ..Default::default()
        });
        session.join("r1");
        assert_eq!(
            session.dispatch(Command::Clear).unwrap(),
            CommandOutcome::CheckpointDeleteRequested
        );
    }

    #[test]
    fn test_chat_is_trimmed_and_not_undoable() {
        let mut session = BoardSession::new(SessionConfig {
            user_name: "Ada".to_string(),
            ..Default::default()
        });
        assert!(session.send_chat("   ").unwrap().is_none());
        session.send_chat("  hello ").unwrap();

        let chat = session.chat();
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].text, "hello");
        assert_eq!(chat[0].user, "Ada");
        assert!(!session.history().can_undo());
    }

    #[test]
    fn test_chat_display_limit() {
        let mut session = BoardSession::new(SessionConfig {
            chat_display_limit: 3,
            ..Default::default()
        });
        for i in 0..5 {
            session.send_chat(&format!("m{i}")).unwrap();
        }
        let texts: Vec<String> = session.chat().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert_eq!(session.document().chat().len(), 5);
    }

    #[test]
    fn test_export_json() {
        let mut session = BoardSession::default();
        session.add_shape(rect(0.0)).unwrap();
        let CommandOutcome::Exported(json) = session.dispatch(Command::Export).unwrap() else {
            panic!("Expected export");
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["shapes"][0]["kind"], "rect");
    }

    #[test]
    fn test_join_queues_after_connect() {
        let mut session = BoardSession::default();
        session.join("r1");
        assert!(session.take_outgoing().is_empty());

        session.on_connected();
        assert_eq!(
            session.take_outgoing(),
            vec![ClientMessage::Join {
                room: "r1".to_string()
            }]
        );
    }

    #[test]
    fn test_local_changes_queue_updates_once_joined() {
        let mut session = BoardSession::default();
        session.add_shape(rect(0.0)).unwrap();
        assert!(!session.has_outgoing());

        session.on_connected();
        session.join("r1");
        session.handle_message(joined("r1", "a")).unwrap();

        // Join, then the full state made while offline, then presence.
        let out = session.take_outgoing();
        assert!(matches!(out[0], ClientMessage::Join { .. }));
        assert!(matches!(out[1], ClientMessage::Update { .. }));
        assert!(matches!(out[2], ClientMessage::Awareness { .. }));

        session.add_shape(rect(5.0)).unwrap();
        let out = session.take_outgoing();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], ClientMessage::Update { .. }));
    }

    #[test]
    fn test_concurrent_strokes_converge_between_sessions() {
        let mut a = connected_session("r1", "a");
        let mut b = connected_session("r1", "b");

        a.begin_stroke(0.0, 0.0, "#000", 2.0, StrokeMode::Draw);
        let s1 = a.commit_stroke().unwrap().unwrap();
        b.begin_stroke(9.0, 9.0, "#fff", 2.0, StrokeMode::Draw);
        let s2 = b.commit_stroke().unwrap().unwrap();

        relay(&mut a, &mut b);
        relay(&mut b, &mut a);

        let mut ids_a: Vec<String> = a.strokes().into_iter().map(|s| s.id).collect();
        let mut ids_b: Vec<String> = b.strokes().into_iter().map(|s| s.id).collect();
        ids_a.sort();
        ids_b.sort();
        let mut expected = vec![s1, s2];
        expected.sort();
        assert_eq!(ids_a, expected);
        assert_eq!(ids_b, expected);
    }

    #[test]
    fn test_remote_update_does_not_touch_local_history() {
        let mut a = connected_session("r1", "a");
        let mut b = connected_session("r1", "b");

        a.add_shape(rect(0.0)).unwrap();
        relay(&mut a, &mut b);

        assert_eq!(b.shapes().len(), 1);
        assert!(!b.history().can_undo());
    }

    #[test]
    fn test_undo_overwrites_remote_edits() {
        let mut a = connected_session("r1", "a");
        let mut b = connected_session("r1", "b");

        a.add_shape(rect(0.0)).unwrap();
        relay(&mut a, &mut b);
        b.add_shape(rect(50.0)).unwrap();
        relay(&mut b, &mut a);
        assert_eq!(a.shapes().len(), 2);

        // A's undo restores its own pre-mutation snapshot, dropping B's shape.
        a.undo().unwrap();
        relay(&mut a, &mut b);
        assert!(a.shapes().is_empty());
        assert_eq!(a.shapes(), b.shapes());
    }

    #[test]
    fn test_presence_flow() {
        let mut a = connected_session("r1", "a");
        let mut b = connected_session("r1", "b");

        a.set_cursor(Some((10.0, 20.0))).unwrap();
        relay(&mut a, &mut b);
        let cursors = b.cursors();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].peer_id, "a");

        a.set_cursor(None).unwrap();
        relay(&mut a, &mut b);
        assert!(b.cursors().is_empty());
        assert!(b.presence().peers().contains_key("a"));

        b.handle_message(ServerMessage::PeerLeft {
            peer_id: "a".to_string(),
        })
        .unwrap();
        assert!(b.presence().peers().is_empty());
    }

    #[test]
    fn test_join_applies_initial_sync_and_presence() {
        let mut a = connected_session("r1", "a");
        a.add_shape(rect(0.0)).unwrap();
        let state = a.document().export_snapshot().unwrap();

        let mut b = BoardSession::default();
        b.on_connected();
        b.join("r1");
        let mut presence = HashMap::new();
        presence.insert("a".to_string(), AwarenessState::default());
        presence.insert("b".to_string(), AwarenessState::default());
        b.handle_message(ServerMessage::Joined {
            room: "r1".to_string(),
            peer_id: "b".to_string(),
            peer_count: 2,
            initial_sync: Some(base64_encode(&state)),
            presence,
        })
        .unwrap();

        assert_eq!(b.shapes(), a.shapes());
        assert_eq!(b.presence().peers().len(), 1);
        assert!(!b.history().can_undo());
    }

    #[test]
    fn test_reconnect_resends_full_state() {
        let mut a = connected_session("r1", "a");
        a.add_shape(rect(0.0)).unwrap();
        a.take_outgoing();

        a.on_disconnected();
        a.add_shape(rect(5.0)).unwrap();
        assert!(!a.has_outgoing());
        assert_eq!(a.shapes().len(), 2);

        a.on_connected();
        a.handle_message(joined("r1", "a2")).unwrap();
        let update = a
            .take_outgoing()
            .into_iter()
            .find_map(|m| match m {
                ClientMessage::Update { data } => Some(data),
                _ => None,
            })
            .unwrap();

        // A fresh replica can rebuild the whole board from the resync.
        let mut fresh = CrdtDocument::new();
        fresh.import(&base64_decode(&update).unwrap()).unwrap();
        assert_eq!(fresh.shapes().len(), 2);
    }

    #[test]
    fn test_leave_resets_board() {
        let mut session = connected_session("r1", "a");
        session.add_shape(rect(0.0)).unwrap();
        session.take_outgoing();

        session.leave();
        assert_eq!(session.take_outgoing(), vec![ClientMessage::Leave]);
        assert!(session.shapes().is_empty());
        assert!(!session.history().can_undo());
        assert!(session.room().is_none());

        // The new document still drives the view
        session.add_shape(rect(1.0)).unwrap();
        assert_eq!(session.shapes().len(), 1);
    }

    #[test]
    fn test_seed_from_checkpoint_only_when_empty() {
        let mut source = BoardSession::default();
        source.add_shape(rect(0.0)).unwrap();
        let snapshot = source.snapshot();

        let mut session = BoardSession::default();
        assert!(session.seed_from_checkpoint(&snapshot).unwrap());
        assert_eq!(session.shapes(), snapshot.shapes);
        assert!(!session.history().can_undo());

        assert!(!session.seed_from_checkpoint(&snapshot).unwrap());
    }

    #[test]
    fn test_checkpoint_roundtrip_through_session() {
        let mut a = connected_session("r1", "a");
        let store = a.checkpoint_store(Arc::new(MemoryBlobStore::new()));
        a.add_shape(rect(0.0)).unwrap();
        a.send_chat("not persisted").unwrap();
        pollster::block_on(a.save_checkpoint(&store)).unwrap();

        let mut b = connected_session("r1", "b");
        assert!(pollster::block_on(b.restore_checkpoint(&store)).unwrap());
        assert_eq!(b.snapshot(), a.snapshot());
        assert!(b.chat().is_empty());
    }

    #[test]
    fn test_autosave_debounce() {
        let store = CheckpointStore::new(Arc::new(MemoryBlobStore::new()));
        let mut session = connected_session("r1", "a");
        let start = Instant::now();
        assert!(!session.autosave_due(start + Duration::from_secs(5)));

        session.add_shape(rect(0.0)).unwrap();
        let later = Instant::now() + Duration::from_millis(800);
        assert!(pollster::block_on(session.autosave(&store, later)).is_some());
        assert!(pollster::block_on(session.autosave(&store, later)).is_none());
        assert!(pollster::block_on(store.load("r1")).is_some());
    }

    #[test]
    fn test_checkpoint_ops_need_room() {
        let store = CheckpointStore::new(Arc::new(MemoryBlobStore::new()));
        let mut session = BoardSession::default();
        assert!(matches!(
            pollster::block_on(session.save_checkpoint(&store)),
            Err(SessionError::NotInRoom)
        ));
    }

    fn joined_with_state(room: &str, peer_id: &str, state: &[u8]) -> ServerMessage {
        ServerMessage::Joined {
            room: room.to_string(),
            peer_id: peer_id.to_string(),
            peer_count: 2,
            initial_sync: Some(base64_encode(state)),
            presence: HashMap::new(),
        }
    }

    fn updates(messages: &[ClientMessage]) -> Vec<Vec<u8>> {
        messages
            .iter()
            .filter_map(|m| match m {
                ClientMessage::Update { data } => base64_decode(data),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_dropped_relay_messages_trigger_rejoin() {
        let mut b = connected_session("r1", "b");
        b.handle_message(ServerMessage::Resync { missed: 3 }).unwrap();
        assert!(!b.is_joined());
        assert_eq!(
            b.take_outgoing(),
            vec![ClientMessage::Join {
                room: "r1".to_string()
            }]
        );

        // Edits while rejoining wait for the confirmation
        b.add_shape(rect(0.0)).unwrap();
        assert!(updates(&b.take_outgoing()).is_empty());
        b.handle_message(joined("r1", "b")).unwrap();
        assert_eq!(updates(&b.take_outgoing()).len(), 1);
    }

    #[test]
    fn test_gapped_update_triggers_rejoin_and_converges() {
        let mut a = connected_session("r1", "a");
        let mut b = connected_session("r1", "b");

        a.add_shape(rect(0.0)).unwrap();
        a.take_outgoing(); // lost on the way to b
        a.add_shape(rect(5.0)).unwrap();
        relay(&mut a, &mut b);

        assert!(b.shapes().is_empty());
        let queued = b.take_outgoing();
        assert!(queued.contains(&ClientMessage::Join {
            room: "r1".to_string()
        }));

        let room_state = a.document().export_snapshot().unwrap();
        b.handle_message(joined_with_state("r1", "b", &room_state)).unwrap();
        assert_eq!(b.shapes(), a.shapes());
        // Nothing of b's own to send back
        assert!(updates(&b.take_outgoing()).is_empty());
    }

    #[test]
    fn test_rejoin_sends_only_ops_the_room_lacks() {
        let mut a = connected_session("r1", "a");
        a.add_shape(rect(0.0)).unwrap();
        let room_state = a.document().export_snapshot().unwrap();

        let mut b = BoardSession::default();
        b.add_shape(rect(9.0)).unwrap();
        b.on_connected();
        b.join("r1");
        b.handle_message(joined_with_state("r1", "b", &room_state)).unwrap();
        assert_eq!(b.shapes().len(), 2);

        let sent = updates(&b.take_outgoing());
        assert_eq!(sent.len(), 1);
        let mut fresh = CrdtDocument::new();
        fresh.import(&sent[0]).unwrap();
        let shapes = fresh.shapes();
        assert_eq!(shapes.len(), 1);
        match &shapes[0] {
            Shape::Rect(r) => assert_eq!(r.x, 9.0),
            _ => panic!("Expected rect"),
        }
    }

    #[test]
    fn test_presence_includes_self_after_join() {
        let mut b = connected_session("r1", "b");
        b.handle_message(ServerMessage::PeerJoined {
            peer_id: "a".to_string(),
        })
        .unwrap();
        let states = b.presence().states();
        assert_eq!(states.len(), 2);
        assert!(states.contains_key("b"));

        b.on_disconnected();
        assert!(b.presence().states().is_empty());
    }
}
