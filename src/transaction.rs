//! The local edit context (§4.3): turns map/list/text mutations into
//! operations and a change, applying a patch to the cached tree immediately
//! so reads inside the same transaction observe the writes.
//!
//! This is the low-level counterpart of Automerge's `core.Transaction` (see
//! the proxy split in [`crate::document`]): every method here corresponds to
//! one of `put`/`put_object`/`insert`/`insert_object`/`delete`/`length`
//! there, just typed against map keys or list indices directly instead of
//! one polymorphic key argument.

use std::collections::BTreeSet;

use crate::change::Change;
use crate::document::Document;
use crate::error::DocError;
use crate::id::{ElemId, ObjId, OpId};
use crate::object::Value;
use crate::op::{Key, Op};
use crate::value::{Expand, MarkData, ObjType, ScalarValue};

pub struct Transaction<'a> {
    doc: &'a mut Document,
    start_op: u64,
    next_op: u64,
    ops: Vec<Op>,
    deps: Vec<crate::id::ChangeHash>,
    message: Option<String>,
    /// Full pre-transaction tree, restored on [`Transaction::rollback`].
    /// A whole-tree snapshot rather than true copy-on-first-write, traded for
    /// simplicity — see the design notes on this module.
    snapshot: crate::materializer::Materializer,
    time: i64,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(doc: &'a mut Document, time: i64) -> Result<Self, DocError> {
        if doc.in_transaction {
            return Err(DocError::NestedTransaction);
        }
        doc.in_transaction = true;
        // §4.3: `startOp = maxOp + 1`, where `maxOp` is the highest op
        // counter used anywhere in the log so far (0 for a fresh document).
        let start_op = doc.oplog.max_op() + 1;
        let snapshot = doc.oplog.tree().clone();
        let deps = doc.oplog.heads().into_iter().collect();
        Ok(Self {
            doc,
            start_op,
            next_op: start_op,
            ops: Vec::new(),
            deps,
            message: None,
            snapshot,
            time,
        })
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    fn alloc(&mut self) -> OpId {
        let id = OpId::new(self.next_op, self.doc.actor);
        self.next_op += 1;
        id
    }

    fn emit(&mut self, obj: ObjId, key: Key, insert: bool, pred: BTreeSet<OpId>, action: crate::op::OpType) -> Result<OpId, DocError> {
        let id = self.alloc();
        let op = Op { obj, key, insert, pred, action };
        self.doc.oplog_mut().tree_mut().apply_op(id, &op)?;
        self.ops.push(op);
        Ok(id)
    }

    fn map_slot_pred(&self, obj: ObjId, key: &str) -> BTreeSet<OpId> {
        self.doc
            .oplog
            .tree()
            .object(obj)
            .and_then(|o| o.as_map())
            .and_then(|m| m.entries.get(key))
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default()
    }

    fn seq_slot_pred(&self, obj: ObjId, elem: ElemId) -> BTreeSet<OpId> {
        self.doc
            .oplog
            .tree()
            .object(obj)
            .and_then(|o| o.as_list())
            .and_then(|l| l.slots.get(&elem))
            .map(|set| set.keys().copied().collect())
            .unwrap_or_default()
    }

    fn elem_at(&self, obj: ObjId, index: usize) -> Result<ElemId, DocError> {
        self.doc
            .oplog
            .tree()
            .object(obj)
            .and_then(|o| o.as_list())
            .and_then(|l| l.elem_at(index))
            .ok_or_else(|| DocError::NotFound(format!("index {}", index)))
    }

    fn after_of(&self, obj: ObjId, index: usize) -> Result<ElemId, DocError> {
        if index == 0 {
            Ok(ElemId::Head)
        } else {
            self.elem_at(obj, index - 1)
        }
    }

    // -- map access -----------------------------------------------------

    pub fn get(&self, obj: ObjId, key: &str) -> Option<(OpId, Value)> {
        self.doc.oplog.tree().object(obj)?.as_map()?.winner(key).map(|(id, v)| (id, v.clone()))
    }

    pub fn keys(&self, obj: ObjId) -> Vec<String> {
        self.doc
            .oplog
            .tree()
            .object(obj)
            .and_then(|o| o.as_map())
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn put(&mut self, obj: ObjId, key: &str, value: ScalarValue) -> Result<OpId, DocError> {
        let pred = self.map_slot_pred(obj, key);
        self.emit(obj, Key::Map(key.to_owned()), false, pred, crate::op::OpType::Set(value))
    }

    pub fn put_object(&mut self, obj: ObjId, key: &str, ty: ObjType) -> Result<ObjId, DocError> {
        let pred = self.map_slot_pred(obj, key);
        let id = self.emit(obj, Key::Map(key.to_owned()), false, pred, crate::op::OpType::Make(ty))?;
        Ok(ObjId::Op(id))
    }

    pub fn delete(&mut self, obj: ObjId, key: &str) -> Result<(), DocError> {
        let pred = self.map_slot_pred(obj, key);
        self.emit(obj, Key::Map(key.to_owned()), false, pred, crate::op::OpType::Del)?;
        Ok(())
    }

    pub fn increment(&mut self, obj: ObjId, key: &str, delta: i64) -> Result<(), DocError> {
        let pred = self.map_slot_pred(obj, key);
        self.emit(obj, Key::Map(key.to_owned()), false, pred, crate::op::OpType::Inc(delta))?;
        Ok(())
    }

    // -- list/text access -------------------------------------------------

    pub fn length(&self, obj: ObjId) -> usize {
        self.doc.oplog.tree().object(obj).and_then(|o| o.as_list()).map(|l| l.len()).unwrap_or(0)
    }

    pub fn get_at(&self, obj: ObjId, index: usize) -> Option<(OpId, Value)> {
        let elem = self.doc.oplog.tree().object(obj)?.as_list()?.elem_at(index)?;
        self.doc.oplog.tree().object(obj)?.as_list()?.winner(elem).map(|(id, v)| (id, v.clone()))
    }

    pub fn insert(&mut self, obj: ObjId, index: usize, value: ScalarValue) -> Result<OpId, DocError> {
        let after = self.after_of(obj, index)?;
        self.emit(obj, Key::Seq(after), true, BTreeSet::new(), crate::op::OpType::Set(value))
    }

    pub fn insert_object(&mut self, obj: ObjId, index: usize, ty: ObjType) -> Result<ObjId, DocError> {
        let after = self.after_of(obj, index)?;
        let id = self.emit(obj, Key::Seq(after), true, BTreeSet::new(), crate::op::OpType::Make(ty))?;
        Ok(ObjId::Op(id))
    }

    pub fn put_at(&mut self, obj: ObjId, index: usize, value: ScalarValue) -> Result<OpId, DocError> {
        let elem = self.elem_at(obj, index)?;
        let pred = self.seq_slot_pred(obj, elem);
        self.emit(obj, Key::Seq(elem), false, pred, crate::op::OpType::Set(value))
    }

    pub fn delete_at(&mut self, obj: ObjId, index: usize) -> Result<(), DocError> {
        let elem = self.elem_at(obj, index)?;
        let pred = self.seq_slot_pred(obj, elem);
        self.emit(obj, Key::Seq(elem), false, pred, crate::op::OpType::Del)?;
        Ok(())
    }

    pub fn increment_at(&mut self, obj: ObjId, index: usize, delta: i64) -> Result<(), DocError> {
        let elem = self.elem_at(obj, index)?;
        let pred = self.seq_slot_pred(obj, elem);
        self.emit(obj, Key::Seq(elem), false, pred, crate::op::OpType::Inc(delta))?;
        Ok(())
    }

    /// Deletes `del_count` characters at `index` and inserts `text`, as one
    /// splice (§4.5, §9: insertions at a position precede deletions of the
    /// positions at and after it).
    pub fn splice_text(&mut self, obj: ObjId, index: usize, del_count: usize, text: &str) -> Result<(), DocError> {
        for ch in text.chars().rev() {
            self.insert(obj, index, ScalarValue::Str(ch.to_string()))?;
        }
        for offset in 0..del_count {
            self.delete_at(obj, index + text.chars().count() + offset)?;
        }
        Ok(())
    }

    pub fn mark(
        &mut self,
        obj: ObjId,
        start_index: usize,
        end_index: usize,
        name: impl Into<String>,
        value: ScalarValue,
        expand: Expand,
    ) -> Result<OpId, DocError> {
        let start = self.elem_at(obj, start_index)?;
        let end = self.elem_at(obj, end_index)?;
        let id = self.alloc();
        let data = MarkData { name: name.into(), value, expand };
        let op = Op::mark(obj, start, end, BTreeSet::new(), data);
        self.doc.oplog_mut().tree_mut().apply_op(id, &op)?;
        self.ops.push(op);
        Ok(id)
    }

    // -- lifecycle ---------------------------------------------------------

    /// Bundles the recorded ops into a change, recording it in the log
    /// without re-applying (the tree already reflects every op, applied as
    /// it was synthesised).
    pub fn commit(self) -> Result<Option<Change>, DocError> {
        let doc = self.doc;
        doc.in_transaction = false;
        if self.ops.is_empty() {
            return Ok(None);
        }
        let change = Change {
            actor: doc.actor,
            seq: doc.oplog.actor_seq(doc.actor) + 1,
            start_op: self.start_op,
            time: self.time,
            message: self.message,
            deps: self.deps,
            ops: self.ops,
        };
        doc.oplog_mut().record_local(change.clone());
        Ok(Some(change))
    }

    /// Discards every op recorded so far and restores the pre-transaction tree.
    pub fn rollback(self) {
        let doc = self.doc;
        *doc.oplog_mut().tree_mut() = self.snapshot;
        doc.in_transaction = false;
    }
}
