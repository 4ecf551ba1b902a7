//! Folds operations into the cached value tree (§4.2).
//!
//! [`Materializer::apply_op`] is the one routine that mutates the tree; it is
//! used identically whether the op arrived as part of a freshly-authored
//! local change or a patch replayed from a remote change (§4.4), which is
//! what gives local reads-after-write and remote merges the same semantics.

use std::collections::BTreeSet;

use fnv::FnvHashMap;

use crate::error::DocError;
use crate::id::{ElemId, ObjId, OpId};
use crate::object::{ConflictSet, ListObject, MapObject, Object, ResolvedMark, Value};
use crate::op::{Key, Op, OpType};
use crate::value::ScalarValue;

#[derive(Clone, Debug)]
pub struct Materializer {
    objects: FnvHashMap<ObjId, Object>,
    /// child -> parent, maintained as composite values win their slot.
    parents: FnvHashMap<ObjId, ObjId>,
}

impl Default for Materializer {
    fn default() -> Self {
        let mut objects = FnvHashMap::default();
        objects.insert(ObjId::Root, Object::Map(MapObject::default()));
        Self { objects, parents: FnvHashMap::default() }
    }
}

impl Materializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, id: ObjId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn parent(&self, id: ObjId) -> Option<ObjId> {
        self.parents.get(&id).copied()
    }

    /// Applies one operation's effect to the tree. `id` is the op's resolved
    /// opId (`change.start_op + index`, `change.actor`), computed by the caller.
    pub fn apply_op(&mut self, id: OpId, op: &Op) -> Result<(), DocError> {
        match &op.action {
            OpType::Make(ty) => {
                let child = ObjId::Op(id);
                self.objects.insert(child, Object::new(*ty));
                self.place(op.obj, &op.key, op.insert, id, &op.pred, Value::Object(child, *ty))?;
            }
            OpType::Set(v) => {
                self.place(op.obj, &op.key, op.insert, id, &op.pred, Value::Scalar(v.clone()))?;
            }
            OpType::Del => self.remove_pred(op.obj, &op.key, &op.pred)?,
            OpType::Inc(delta) => self.increment(op.obj, &op.key, &op.pred, *delta)?,
            OpType::Mark(end, data) => {
                let start = match &op.key {
                    Key::Seq(e) => *e,
                    Key::Map(_) => {
                        return Err(DocError::InvalidArgument("mark requires a sequence key".into()))
                    }
                };
                let list = self.list_mut(op.obj)?;
                list.marks.push(ResolvedMark { id, start, end: *end, data: data.clone() });
            }
        }
        Ok(())
    }

    fn map_mut(&mut self, id: ObjId) -> Result<&mut MapObject, DocError> {
        self.objects
            .get_mut(&id)
            .and_then(Object::as_map_mut)
            .ok_or_else(|| DocError::CorruptPatch(id.to_string()))
    }

    fn list_mut(&mut self, id: ObjId) -> Result<&mut ListObject, DocError> {
        self.objects
            .get_mut(&id)
            .and_then(Object::as_list_mut)
            .ok_or_else(|| DocError::CorruptPatch(id.to_string()))
    }

    fn conflict_set_mut(&mut self, obj: ObjId, key: &Key) -> Result<&mut ConflictSet, DocError> {
        match key {
            Key::Map(k) => Ok(self.map_mut(obj)?.entries.entry(k.clone()).or_default()),
            Key::Seq(elem) => Ok(self.list_mut(obj)?.slots.entry(*elem).or_default()),
        }
    }

    fn place(
        &mut self,
        obj: ObjId,
        key: &Key,
        insert: bool,
        id: OpId,
        pred: &BTreeSet<OpId>,
        value: Value,
    ) -> Result<(), DocError> {
        if insert {
            let after = match key {
                Key::Seq(e) => *e,
                Key::Map(_) => {
                    return Err(DocError::InvalidArgument("insert requires a sequence key".into()))
                }
            };
            let list = self.list_mut(obj)?;
            let idx = list.insertion_index(after, id);
            let elem = ElemId::Op(id);
            list.order.insert(idx, elem);
            let mut set = ConflictSet::new();
            set.insert(id, value.clone());
            list.slots.insert(elem, set);
        } else {
            let set = self.conflict_set_mut(obj, key)?;
            for p in pred {
                set.remove(p);
            }
            set.insert(id, value.clone());
        }
        self.track_parent(obj, &value);
        Ok(())
    }

    fn remove_pred(&mut self, obj: ObjId, key: &Key, pred: &BTreeSet<OpId>) -> Result<(), DocError> {
        let set = self.conflict_set_mut(obj, key)?;
        for p in pred {
            set.remove(p);
        }
        Ok(())
    }

    fn increment(
        &mut self,
        obj: ObjId,
        key: &Key,
        pred: &BTreeSet<OpId>,
        delta: i64,
    ) -> Result<(), DocError> {
        let set = self.conflict_set_mut(obj, key)?;
        for (op_id, value) in set.iter_mut() {
            if pred.contains(op_id) {
                if let Value::Scalar(ScalarValue::Counter(n)) = value {
                    *n += delta;
                }
            }
        }
        Ok(())
    }

    /// Records that `value`, if a composite reference, is currently reachable
    /// from `parent`. A composite claimed by two distinct parents at once is
    /// a protocol violation (§4.2, §9).
    fn track_parent(&mut self, parent: ObjId, value: &Value) {
        if let Value::Object(child, _) = value {
            if let Some(existing) = self.parents.get(child) {
                if *existing != parent {
                    tracing::warn!(?child, ?existing, attempted = ?parent, "object claimed by a second parent");
                    return;
                }
            }
            self.parents.insert(*child, parent);
        }
    }

    pub fn check_single_parent(&self, child: ObjId, parent: ObjId) -> Result<(), DocError> {
        if let Some(existing) = self.parents.get(&child) {
            if *existing != parent {
                return Err(DocError::MultipleParents(child.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ActorId;
    use crate::op::{Key, Op};
    use crate::value::{ObjType, ScalarValue};
    use std::collections::BTreeSet;

    #[test]
    fn make_then_set_resolves_winner_by_lamport_max() {
        let actor_a = ActorId::new([1; 16]);
        let actor_b = ActorId::new([2; 16]);
        let mut tree = Materializer::new();
        let set_a = OpId::new(1, actor_a);
        let set_b = OpId::new(1, actor_b);
        tree.apply_op(set_a, &Op::set(ObjId::Root, Key::Map("bird".into()), false, BTreeSet::new(), ScalarValue::Str("magpie".into()))).unwrap();
        tree.apply_op(set_b, &Op::set(ObjId::Root, Key::Map("bird".into()), false, BTreeSet::new(), ScalarValue::Str("blackbird".into()))).unwrap();

        let map = tree.object(ObjId::Root).unwrap().as_map().unwrap();
        let (winner_id, value) = map.winner("bird").unwrap();
        assert_eq!(winner_id, set_b);
        assert!(matches!(value, Value::Scalar(ScalarValue::Str(s)) if s == "blackbird"));
    }

    #[test]
    fn check_single_parent_rejects_second_claim() {
        let actor = ActorId::new([1; 16]);
        let mut tree = Materializer::new();
        let make_id = OpId::new(1, actor);
        let child = ObjId::Op(make_id);
        tree.apply_op(
            make_id,
            &Op::make(ObjId::Root, Key::Map("a".into()), false, BTreeSet::new(), ObjType::Map),
        )
        .unwrap();
        assert!(tree.check_single_parent(child, ObjId::Root).is_ok());

        let other_parent = ObjId::Op(OpId::new(2, actor));
        assert!(matches!(
            tree.check_single_parent(child, other_parent),
            Err(DocError::MultipleParents(_))
        ));
    }

    #[test]
    fn del_empties_conflict_set_when_all_preds_removed() {
        let actor = ActorId::new([1; 16]);
        let mut tree = Materializer::new();
        let set_id = OpId::new(1, actor);
        tree.apply_op(set_id, &Op::set(ObjId::Root, Key::Map("a".into()), false, BTreeSet::new(), ScalarValue::Int(1))).unwrap();
        let del_id = OpId::new(2, actor);
        tree.apply_op(del_id, &Op::del(ObjId::Root, Key::Map("a".into()), BTreeSet::from([set_id]))).unwrap();

        let map = tree.object(ObjId::Root).unwrap().as_map().unwrap();
        assert!(map.winner("a").is_none());
    }
}
