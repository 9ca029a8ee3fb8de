//! Ephemeral per-participant presence: cursor, name and color.
//!
//! Presence is independent of the document. It is never persisted and is
//! rebuilt from scratch after a reconnect.

use std::collections::HashMap;

use crate::sync::{AwarenessState, ClientMessage, CursorPosition};

/// One field of the local presence record.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceField {
    /// `None` signals that the cursor left the canvas.
    Cursor(Option<CursorPosition>),
    Name(String),
    Color(String),
}

/// A participant's cursor as rendered by other replicas.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub peer_id: String,
    pub position: CursorPosition,
    pub name: String,
    pub color: String,
}

type UpdateCallback = Box<dyn FnMut(&HashMap<String, AwarenessState>)>;

/// Presence of the local participant and every remote peer in the room.
pub struct PresenceChannel {
    local: AwarenessState,
    /// Id the relay assigned to this participant, once joined.
    local_id: Option<String>,
    remote: HashMap<String, AwarenessState>,
    /// Local state changed since the last broadcast.
    dirty: bool,
    listeners: Vec<UpdateCallback>,
}

impl PresenceChannel {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            local: AwarenessState {
                cursor: None,
                name: name.into(),
                color: color.into(),
            },
            local_id: None,
            remote: HashMap::new(),
            dirty: true,
            listeners: Vec::new(),
        }
    }

    pub fn local(&self) -> &AwarenessState {
        &self.local
    }

    /// Update one field of the local record and queue a broadcast.
    pub fn set_local(&mut self, field: PresenceField) {
        match field {
            PresenceField::Cursor(cursor) => self.local.cursor = cursor,
            PresenceField::Name(name) => self.local.name = name,
            PresenceField::Color(color) => self.local.color = color,
        }
        self.dirty = true;
        if self.local_id.is_some() {
            self.notify();
        }
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// Record the id the relay assigned to this participant. Until it is
    /// known the local record is left out of [`states`](Self::states).
    pub fn set_local_id(&mut self, id: Option<String>) {
        self.local_id = id;
    }

    /// Every participant's record keyed by id, the local one included.
    pub fn states(&self) -> HashMap<String, AwarenessState> {
        let mut states = self.remote.clone();
        if let Some(id) = &self.local_id {
            states.insert(id.clone(), self.local.clone());
        }
        states
    }

    /// The pending broadcast, if the local record changed.
    pub fn take_broadcast(&mut self) -> Option<ClientMessage> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(ClientMessage::Awareness {
            state: self.local.clone(),
        })
    }

    /// Force the local record to be sent again, e.g. after joining a room.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Register a callback invoked with [`states`](Self::states) on every
    /// change.
    pub fn on_update(&mut self, callback: impl FnMut(&HashMap<String, AwarenessState>) + 'static) {
        self.listeners.push(Box::new(callback));
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let states = self.states();
        for listener in &mut self.listeners {
            listener(&states);
        }
    }

    /// Apply a record received from a peer. Last write wins.
    pub fn apply_remote(&mut self, peer_id: &str, state: AwarenessState) {
        if self.local_id.as_deref() == Some(peer_id) {
            return;
        }
        self.remote.insert(peer_id.to_string(), state);
        self.notify();
    }

    /// Replace all remote state with the relay's view, as sent on join.
    pub fn replace_remote(&mut self, mut peers: HashMap<String, AwarenessState>) {
        if let Some(id) = &self.local_id {
            peers.remove(id);
        }
        self.remote = peers;
        self.notify();
    }

    /// A peer joined; it gets a default record until it reports its own.
    pub fn add_peer(&mut self, peer_id: &str) {
        self.remote.entry(peer_id.to_string()).or_default();
        self.notify();
    }

    /// Remove a departed peer entirely.
    pub fn remove_peer(&mut self, peer_id: &str) {
        if self.remote.remove(peer_id).is_some() {
            self.notify();
        }
    }

    pub fn peers(&self) -> &HashMap<String, AwarenessState> {
        &self.remote
    }

    /// Remote cursors to render, sorted by peer id. Peers without a cursor
    /// are left out.
    pub fn cursors(&self) -> Vec<RemoteCursor> {
        let mut cursors: Vec<RemoteCursor> = self
            .remote
            .iter()
            .filter_map(|(peer_id, state)| {
                state.cursor.map(|position| RemoteCursor {
                    peer_id: peer_id.clone(),
                    position,
                    name: state.name.clone(),
                    color: state.color.clone(),
                })
            })
            .collect();
        cursors.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        cursors
    }

    /// Drop all remote state and the local id. The local record is kept and
    /// re-sent.
    pub fn reset(&mut self) {
        self.dirty = true;
        let had_state = !self.remote.is_empty() || self.local_id.is_some();
        self.remote.clear();
        self.local_id = None;
        if had_state {
            self.notify();
        }
    }
}

impl Default for PresenceChannel {
    fn default() -> Self {
        let state = AwarenessState::default();
        Self::new(state.name, state.color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{DEFAULT_COLOR, DEFAULT_NAME};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn at(x: f64, y: f64) -> Option<CursorPosition> {
        Some(CursorPosition { x, y })
    }

    #[test]
    fn test_defaults() {
        let presence = PresenceChannel::default();
        assert_eq!(presence.local().name, DEFAULT_NAME);
        assert_eq!(presence.local().color, DEFAULT_COLOR);
        assert!(presence.local().cursor.is_none());
    }

    #[test]
    fn test_set_local_queues_one_broadcast() {
        let mut presence = PresenceChannel::default();
        presence.take_broadcast();

        presence.set_local(PresenceField::Cursor(at(1.0, 2.0)));
        presence.set_local(PresenceField::Name("Ada".to_string()));

        match presence.take_broadcast() {
            Some(ClientMessage::Awareness { state }) => {
                assert_eq!(state.cursor, at(1.0, 2.0));
                assert_eq!(state.name, "Ada");
            }
            other => panic!("Expected awareness, got {:?}", other),
        }
        assert!(presence.take_broadcast().is_none());
    }

    #[test]
    fn test_absent_cursors_are_filtered() {
        let mut presence = PresenceChannel::default();
        presence.apply_remote(
            "b",
            AwarenessState {
                cursor: at(5.0, 5.0),
                ..Default::default()
            },
        );
        presence.apply_remote("a", AwarenessState::default());

        let cursors = presence.cursors();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[0].peer_id, "b");
        assert_eq!(presence.peers().len(), 2);
    }

    #[test]
    fn test_remove_peer_notifies_full_map() {
        let mut presence = PresenceChannel::default();
        let sizes = Rc::new(RefCell::new(Vec::new()));
        let s = sizes.clone();
        presence.on_update(move |peers| s.borrow_mut().push(peers.len()));

        presence.add_peer("a");
        presence.apply_remote("b", AwarenessState::default());
        presence.remove_peer("a");
        presence.remove_peer("missing");

        assert_eq!(*sizes.borrow(), vec![1, 2, 1]);
        assert!(!presence.peers().contains_key("a"));
    }

    #[test]
    fn test_updates_include_local_participant_once_joined() {
        let mut presence = PresenceChannel::new("Ada", "#f00");
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        presence.on_update(move |states| {
            let mut ids: Vec<String> = states.keys().cloned().collect();
            ids.sort();
            s.borrow_mut().push(ids);
        });

        presence.set_local_id(Some("me".to_string()));
        presence.apply_remote("b", AwarenessState::default());
        presence.set_local(PresenceField::Cursor(at(1.0, 1.0)));
        presence.remove_peer("b");

        let me = vec!["me".to_string()];
        let both = vec!["b".to_string(), "me".to_string()];
        assert_eq!(*seen.borrow(), vec![both.clone(), both, me]);
        assert_eq!(presence.states()["me"].name, "Ada");
        assert_eq!(presence.states()["me"].cursor, at(1.0, 1.0));
        // Own cursor is not rendered as a remote one
        assert!(presence.cursors().is_empty());

        presence.reset();
        assert!(presence.states().is_empty());
        assert_eq!(seen.borrow().last(), Some(&Vec::new()));
    }

    #[test]
    fn test_last_write_wins() {
        let mut presence = PresenceChannel::default();
        presence.apply_remote(
            "a",
            AwarenessState {
                cursor: at(1.0, 1.0),
                ..Default::default()
            },
        );
        presence.apply_remote(
            "a",
            AwarenessState {
                cursor: None,
                name: "Bob".to_string(),
                ..Default::default()
            },
        );

        assert!(presence.cursors().is_empty());
        assert_eq!(presence.peers()["a"].name, "Bob");
    }

    #[test]
    fn test_reset_clears_remote_and_resends_local() {
        let mut presence = PresenceChannel::new("Ada", "#f00");
        presence.take_broadcast();
        presence.apply_remote("a", AwarenessState::default());

        presence.reset();
        assert!(presence.peers().is_empty());
        assert!(presence.take_broadcast().is_some());
    }
}
