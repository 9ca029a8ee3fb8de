//! Local canvas view and snapshots.

use crate::chat::{self, ChatMessage};
use crate::shapes::{Shape, Stroke};
use serde::{Deserialize, Serialize};

/// A deep copy of the canvas content (strokes and shapes) used for undo/redo
/// and checkpointing. Chat is not part of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub strokes: Vec<Stroke>,
    pub shapes: Vec<Shape>,
}

impl Snapshot {
    pub fn new(strokes: Vec<Stroke>, shapes: Vec<Shape>) -> Self {
        Self { strokes, shapes }
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty() && self.shapes.is_empty()
    }
}

/// What one replica currently shows, re-derived from the document after each
/// change. The in-progress stroke is local until committed.
#[derive(Debug, Clone, Default)]
pub struct CanvasView {
    pub strokes: Vec<Stroke>,
    pub shapes: Vec<Shape>,
    pub chat: Vec<ChatMessage>,
    /// Stroke being drawn by the local user, not yet in the document.
    pub drawing: Option<Stroke>,
    /// Locally selected shape.
    pub selected: Option<String>,
}

impl CanvasView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            strokes: self.strokes.clone(),
            shapes: self.shapes.clone(),
        }
    }

    pub fn get_shape(&self, id: &str) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id() == id)
    }

    /// The selected shape, if it still exists.
    pub fn selected_shape(&self) -> Option<&Shape> {
        self.selected.as_deref().and_then(|id| self.get_shape(id))
    }

    /// Strokes to render: committed strokes followed by the one in progress.
    pub fn visible_strokes(&self) -> impl Iterator<Item = &Stroke> {
        self.strokes.iter().chain(self.drawing.iter())
    }

    /// Chat messages kept for display.
    pub fn recent_chat(&self, limit: usize) -> &[ChatMessage] {
        chat::recent(&self.chat, limit)
    }

    /// Drop the selection if the shape it points to is gone.
    pub fn prune_selection(&mut self) {
        if self.selected.is_some() && self.selected_shape().is_none() {
            self.selected = None;
        }
    }
}
