//! The top-level document handle and its read-only proxy surface.
//!
//! Reads and writes are split the way Automerge's `ReadProxy`/`WriteProxy`
//! pair is: [`Document`] itself is the read-only view directly over the root
//! map, while [`crate::transaction::Transaction`] is the mutable side opened
//! by [`Document::transact`].

use std::time::{SystemTime, UNIX_EPOCH};

use crate::change::Change;
use crate::error::DocError;
use crate::id::{ActorId, ChangeHash, DocId, ObjId};
use crate::object::Value;
use crate::oplog::OpLog;
use crate::patch::Patch;
use crate::sync::{SyncMessage, SyncState};
use crate::transaction::Transaction;
use crate::value::ScalarValue;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// A value read back from the document tree: either a scalar, or a
/// reference to a nested composite (whose own contents are read through the
/// same `Document`, addressed by the returned `ObjId`).
#[derive(Clone, Debug)]
pub enum DocValue {
    Scalar(ScalarValue),
    Map(ObjId),
    List(ObjId),
    Text(ObjId),
}

impl DocValue {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Scalar(s) => DocValue::Scalar(s.clone()),
            Value::Object(id, crate::value::ObjType::Map) => DocValue::Map(*id),
            Value::Object(id, crate::value::ObjType::List) => DocValue::List(*id),
            Value::Object(id, crate::value::ObjType::Text) => DocValue::Text(*id),
        }
    }
}

pub struct Document {
    pub(crate) id: DocId,
    pub(crate) actor: ActorId,
    pub(crate) oplog: OpLog,
    pub(crate) in_transaction: bool,
}

impl Document {
    pub fn new(actor: ActorId) -> Self {
        Self { id: DocId::random(), actor, oplog: OpLog::new(), in_transaction: false }
    }

    pub fn with_id(id: DocId, actor: ActorId) -> Self {
        Self { id, actor, oplog: OpLog::new(), in_transaction: false }
    }

    pub fn id(&self) -> DocId {
        self.id
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn heads(&self) -> std::collections::BTreeSet<ChangeHash> {
        self.oplog.heads()
    }

    pub(crate) fn oplog_mut(&mut self) -> &mut OpLog {
        &mut self.oplog
    }

    pub fn root(&self) -> ObjId {
        ObjId::Root
    }

    /// Opens a transaction, runs `f`, and commits on success or rolls back
    /// on error/panic-free early return. Re-entering a transaction on the
    /// same document fails with [`DocError::NestedTransaction`].
    pub fn transact<F, T>(&mut self, f: F) -> Result<T, DocError>
    where
        F: FnOnce(&mut Transaction) -> Result<T, DocError>,
    {
        let time = now_ms();
        let mut tx = Transaction::new(self, time)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }

    // -- read access ---------------------------------------------------

    pub fn get(&self, obj: ObjId, key: &str) -> Option<DocValue> {
        let map = self.oplog.tree().object(obj)?.as_map()?;
        map.winner(key).map(|(_, v)| DocValue::from_value(v))
    }

    pub fn conflicts(&self, obj: ObjId, key: &str) -> Vec<(crate::id::OpId, DocValue)> {
        self.oplog
            .tree()
            .object(obj)
            .and_then(|o| o.as_map())
            .and_then(|m| m.entries.get(key))
            .map(|set| set.iter().map(|(id, v)| (*id, DocValue::from_value(v))).collect())
            .unwrap_or_default()
    }

    pub fn keys(&self, obj: ObjId) -> Vec<String> {
        self.oplog
            .tree()
            .object(obj)
            .and_then(|o| o.as_map())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn length(&self, obj: ObjId) -> usize {
        self.oplog.tree().object(obj).and_then(|o| o.as_list()).map(|l| l.len()).unwrap_or(0)
    }

    pub fn get_at(&self, obj: ObjId, index: usize) -> Option<DocValue> {
        let list = self.oplog.tree().object(obj)?.as_list()?;
        let elem = list.elem_at(index)?;
        list.winner(elem).map(|(_, v)| DocValue::from_value(v))
    }

    pub fn text(&self, obj: ObjId) -> String {
        self.oplog
            .tree()
            .object(obj)
            .and_then(|o| o.as_list())
            .map(crate::text::render)
            .unwrap_or_default()
    }

    // -- replication -----------------------------------------------------

    pub fn apply_change(&mut self, change: Change) -> Result<Patch, DocError> {
        self.oplog.apply_change(change)
    }

    pub fn get_changes(&self, have: &std::collections::BTreeSet<ChangeHash>) -> Vec<Change> {
        self.oplog.get_changes(have).into_iter().cloned().collect()
    }

    pub fn merge(&mut self, other: &Document) -> Result<Patch, DocError> {
        self.oplog.merge(&other.oplog)
    }

    pub fn fork(&self) -> Self {
        Self { id: self.id, actor: ActorId::random(), oplog: self.oplog.fork(), in_transaction: false }
    }

    pub fn save(&self) -> Vec<u8> {
        self.oplog.save()
    }

    pub fn load(bytes: &[u8], id: DocId, actor: ActorId) -> Result<Self, DocError> {
        Ok(Self { id, actor, oplog: OpLog::load(bytes)?, in_transaction: false })
    }

    // -- sync protocol (§4.6) --------------------------------------------

    pub fn generate_sync_message(&self, state: &mut SyncState) -> Option<SyncMessage> {
        crate::sync::generate_message(&self.oplog, state)
    }

    pub fn receive_sync_message(
        &mut self,
        state: &mut SyncState,
        message: SyncMessage,
    ) -> Result<Patch, DocError> {
        crate::sync::receive_message(&mut self.oplog, state, message)
    }
}
