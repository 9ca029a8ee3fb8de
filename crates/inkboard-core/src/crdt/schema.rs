//! Loro document schema and operations.

use std::collections::{HashMap, HashSet};

use loro::{ExportMode, ImportStatus, LoroDoc, LoroList, LoroMap, LoroValue, VersionVector};
use thiserror::Error;

use super::convert::{Record, Sequence};
use crate::canvas::Snapshot;
use crate::chat::ChatMessage;
use crate::shapes::{Shape, Stroke};

/// Errors raised by document operations.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("CRDT error: {0}")]
    Loro(#[from] loro::LoroError),
    #[error("Encode error: {0}")]
    Encode(String),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Handle returned by `observe_*`, used to unregister the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer<R> = Box<dyn FnMut(&[R])>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    strokes: Vec<(ObserverId, Observer<Stroke>)>,
    shapes: Vec<(ObserverId, Observer<Shape>)>,
    chat: Vec<(ObserverId, Observer<ChatMessage>)>,
}

impl Observers {
    fn next_id(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }
}

/// Mutations grouped into one commit by [`CrdtDocument::transact`].
pub struct Transaction<'a> {
    doc: &'a LoroDoc,
}

impl Transaction<'_> {
    fn list(&self, sequence: Sequence) -> LoroList {
        self.doc.get_list(sequence.key())
    }

    /// Append one record at the end of its sequence.
    pub fn append<R: Record>(&self, record: &R) -> DocumentResult<()> {
        let list = self.list(R::SEQUENCE);
        let map = list.insert_container(list.len(), LoroMap::new())?;
        record.write_loro(&map)?;
        Ok(())
    }

    /// Clear the sequence and repopulate it with `records`.
    ///
    /// The delete only covers records this replica has seen. Records appended
    /// concurrently elsewhere survive the merge, and two concurrent replaces
    /// both land; materialization keeps the first copy of each id.
    pub fn replace_all<R: Record>(&self, records: &[R]) -> DocumentResult<()> {
        let list = self.list(R::SEQUENCE);
        let len = list.len();
        if len > 0 {
            list.delete(0, len)?;
        }
        for record in records {
            let map = list.insert_container(list.len(), LoroMap::new())?;
            record.write_loro(&map)?;
        }
        Ok(())
    }
}

/// The replicated canvas document.
///
/// ```text
/// LoroDoc
/// ├── "strokes": LoroList<LoroMap>
/// ├── "shapes":  LoroList<LoroMap>
/// └── "chat":    LoroList<LoroMap>
/// ```
///
/// Observers receive the fully materialized sequence after every commit or
/// import that changed it.
pub struct CrdtDocument {
    doc: LoroDoc,
    observers: Observers,
    /// Deep value of each sequence as last delivered to observers.
    last_seen: HashMap<Sequence, LoroValue>,
    /// Oplog version already handed out by `take_local_updates`.
    synced: VersionVector,
}

impl CrdtDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self::from_doc(LoroDoc::new())
    }

    /// Create a document from exported bytes.
    pub fn from_snapshot(bytes: &[u8]) -> DocumentResult<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)?;
        Ok(Self::from_doc(doc))
    }

    fn from_doc(doc: LoroDoc) -> Self {
        let mut this = Self {
            doc,
            observers: Observers::default(),
            last_seen: HashMap::new(),
            synced: VersionVector::default(),
        };
        for sequence in Sequence::ALL {
            let value = this.deep_value(sequence);
            this.last_seen.insert(sequence, value);
        }
        this.synced = this.doc.oplog_vv();
        this
    }

    /// Get the underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn peer_id(&self) -> u64 {
        self.doc.peer_id()
    }

    fn deep_value(&self, sequence: Sequence) -> LoroValue {
        self.doc.get_list(sequence.key()).get_deep_value()
    }

    /// Number of raw entries in a sequence, including duplicate ids.
    pub fn len(&self, sequence: Sequence) -> usize {
        self.doc.get_list(sequence.key()).len()
    }

    /// Materialize a sequence. The first occurrence of each id wins;
    /// entries that fail to decode are skipped.
    pub fn records<R: Record>(&self) -> Vec<R> {
        let LoroValue::List(items) = self.deep_value(R::SEQUENCE) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut result = Vec::with_capacity(items.len());
        for item in items.iter() {
            if let LoroValue::Map(map) = item {
                if let Some(record) = R::read_loro(map) {
                    if seen.insert(record.record_id().to_string()) {
                        result.push(record);
                    }
                }
            }
        }
        result
    }

    pub fn strokes(&self) -> Vec<Stroke> {
        self.records()
    }

    pub fn shapes(&self) -> Vec<Shape> {
        self.records()
    }

    pub fn chat(&self) -> Vec<ChatMessage> {
        self.records()
    }

    /// Current canvas content.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.strokes(), self.shapes())
    }

    /// Whether the document holds no strokes and no shapes.
    pub fn is_canvas_empty(&self) -> bool {
        self.len(Sequence::Strokes) == 0 && self.len(Sequence::Shapes) == 0
    }

    /// Run `f` as one commit. Observers fire once per changed sequence after
    /// the whole transaction.
    ///
    /// Loro cannot roll back an open transaction, so if `f` fails the ops it
    /// already applied are still committed and observed before the error is
    /// returned. Replicas never see state that this replica does not.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&Transaction<'_>) -> DocumentResult<T>,
    ) -> DocumentResult<T> {
        let result = f(&Transaction { doc: &self.doc });
        self.doc.commit();
        self.notify();
        result
    }

    /// Append one record.
    pub fn append<R: Record>(&mut self, record: &R) -> DocumentResult<()> {
        self.transact(|tx| tx.append(record))
    }

    /// Replace one sequence wholesale.
    pub fn replace_all<R: Record>(&mut self, records: &[R]) -> DocumentResult<()> {
        self.transact(|tx| tx.replace_all(records))
    }

    /// Replace strokes and shapes in a single transaction.
    pub fn restore(&mut self, snapshot: &Snapshot) -> DocumentResult<()> {
        self.transact(|tx| {
            tx.replace_all(&snapshot.strokes)?;
            tx.replace_all(&snapshot.shapes)
        })
    }

    pub fn observe_strokes(&mut self, callback: impl FnMut(&[Stroke]) + 'static) -> ObserverId {
        let id = self.observers.next_id();
        self.observers.strokes.push((id, Box::new(callback)));
        id
    }

    pub fn observe_shapes(&mut self, callback: impl FnMut(&[Shape]) + 'static) -> ObserverId {
        let id = self.observers.next_id();
        self.observers.shapes.push((id, Box::new(callback)));
        id
    }

    pub fn observe_chat(&mut self, callback: impl FnMut(&[ChatMessage]) + 'static) -> ObserverId {
        let id = self.observers.next_id();
        self.observers.chat.push((id, Box::new(callback)));
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.strokes.len()
            + self.observers.shapes.len()
            + self.observers.chat.len();
        self.observers.strokes.retain(|(i, _)| *i != id);
        self.observers.shapes.retain(|(i, _)| *i != id);
        self.observers.chat.retain(|(i, _)| *i != id);
        let after = self.observers.strokes.len()
            + self.observers.shapes.len()
            + self.observers.chat.len();
        after < before
    }

    /// Deliver changed sequences to their observers.
    fn notify(&mut self) {
        for sequence in Sequence::ALL {
            let value = self.deep_value(sequence);
            if self.last_seen.get(&sequence) == Some(&value) {
                continue;
            }
            self.last_seen.insert(sequence, value);
            match sequence {
                Sequence::Strokes => {
                    let records = self.strokes();
                    for (_, callback) in &mut self.observers.strokes {
                        callback(&records);
                    }
                }
                Sequence::Shapes => {
                    let records = self.shapes();
                    for (_, callback) in &mut self.observers.shapes {
                        callback(&records);
                    }
                }
                Sequence::Chat => {
                    let records = self.chat();
                    for (_, callback) in &mut self.observers.chat {
                        callback(&records);
                    }
                }
            }
        }
    }

    /// Export the document as a snapshot (full state).
    pub fn export_snapshot(&self) -> DocumentResult<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| DocumentError::Encode(e.to_string()))
    }

    /// Export incremental updates since a version.
    pub fn export_updates(&self, since: &VersionVector) -> DocumentResult<Vec<u8>> {
        self.doc
            .export(ExportMode::updates(since))
            .map_err(|e| DocumentError::Encode(e.to_string()))
    }

    /// Updates not yet handed out since the last call (or the last
    /// [`mark_synced`](Self::mark_synced)). `None` when nothing changed.
    pub fn take_local_updates(&mut self) -> DocumentResult<Option<Vec<u8>>> {
        let current = self.doc.oplog_vv();
        if current == self.synced {
            return Ok(None);
        }
        let bytes = self.export_updates(&self.synced)?;
        self.synced = current;
        Ok(Some(bytes))
    }

    /// Treat everything in the oplog as already shared.
    pub fn mark_synced(&mut self) {
        self.synced = self.doc.oplog_vv();
    }

    /// Import updates or a snapshot from another replica. Importing the same
    /// bytes twice is a no-op.
    ///
    /// Ops whose dependencies have not arrived yet are parked by Loro and
    /// reported in [`ImportStatus::pending`]; they stay invisible until the
    /// missing ops are imported.
    pub fn import(&mut self, bytes: &[u8]) -> DocumentResult<ImportStatus> {
        let status = self.doc.import(bytes)?;
        self.notify();
        Ok(status)
    }

    /// Version a replica reaches after importing `bytes` exported as a
    /// snapshot.
    pub fn blob_version(bytes: &[u8]) -> DocumentResult<VersionVector> {
        let meta = LoroDoc::decode_import_blob_meta(bytes, false)?;
        Ok(meta.partial_end_vv)
    }

    /// Get the current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }
}

impl Default for CrdtDocument {
    fn default() -> Self {
        Self::new()
    }
}
