//! CRDT integration using Loro for collaborative editing.
//!
//! Each room is one Loro document with three root lists: strokes, shapes and
//! chat. Appends from different replicas commute. Undo, redo and clear are
//! expressed as whole-sequence replaces, which converge but do not merge
//! intent with concurrent edits.

mod convert;
mod schema;

pub use convert::{Record, Sequence};
pub use schema::{CrdtDocument, DocumentError, DocumentResult, ObserverId, Transaction};

// Re-export Loro types that may be useful for collaboration
pub use loro::{ExportMode, ImportStatus, VersionVector};
