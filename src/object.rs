//! The materialised value tree: one [`Object`] per composite, each holding a
//! per-slot conflict set that the [`crate::patch`] applier mutates in place.

use std::collections::BTreeMap;

use crate::id::{ElemId, ObjId, OpId};
use crate::value::{MarkData, ObjType, ScalarValue};

/// What a conflict-set entry points at: either a scalar or a reference to
/// another composite object (whose own contents live in a sibling [`Object`]).
#[derive(Clone, Debug)]
pub enum Value {
    Scalar(ScalarValue),
    Object(ObjId, ObjType),
}

/// The live candidates for one slot (a map key or a list/text position).
/// Ordered by `OpId` so the Lamport-max winner is always `.iter().next_back()`.
pub type ConflictSet = BTreeMap<OpId, Value>;

#[derive(Clone, Debug, Default)]
pub struct MapObject {
    pub entries: BTreeMap<String, ConflictSet>,
}

impl MapObject {
    pub fn winner(&self, key: &str) -> Option<(OpId, &Value)> {
        self.entries.get(key).and_then(|set| set.iter().next_back()).map(|(id, v)| (*id, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().filter(|(_, set)| !set.is_empty()).map(|(k, _)| k)
    }
}

/// A list (or the backing structure of a text object). `order` holds every
/// position ever created, live or tombstoned, in final sequence order, so
/// that `after`-relative inserts keep resolving even once a position is
/// deleted. `slots` holds the conflict set per position; an empty conflict
/// set means the position is a tombstone.
#[derive(Clone, Debug, Default)]
pub struct ListObject {
    pub order: Vec<ElemId>,
    pub slots: BTreeMap<ElemId, ConflictSet>,
    pub marks: Vec<ResolvedMark>,
}

/// A mark range resolved to the element ids bounding it, with its own op-id
/// so that a later mark wins per §4.5.
#[derive(Clone, Debug)]
pub struct ResolvedMark {
    pub id: OpId,
    pub start: ElemId,
    pub end: ElemId,
    pub data: MarkData,
}

impl ListObject {
    pub fn is_live(&self, elem: ElemId) -> bool {
        self.slots.get(&elem).map(|set| !set.is_empty()).unwrap_or(false)
    }

    pub fn live_order(&self) -> impl Iterator<Item = ElemId> + '_ {
        self.order.iter().copied().filter(move |e| self.is_live(*e))
    }

    pub fn len(&self) -> usize {
        self.live_order().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maps a live index (as seen by a caller) to the underlying element id.
    pub fn elem_at(&self, index: usize) -> Option<ElemId> {
        self.live_order().nth(index)
    }

    pub fn winner(&self, elem: ElemId) -> Option<(OpId, &Value)> {
        self.slots.get(&elem).and_then(|set| set.iter().next_back()).map(|(id, v)| (*id, v))
    }

    /// RGA insertion point: scan forward from just after `after`, stepping
    /// over any already-present element whose id dominates `new_id` in
    /// Lamport order (§4.2: "descending by opId" among same-anchor siblings).
    pub fn insertion_index(&self, after: ElemId, new_id: OpId) -> usize {
        let start = if after == ElemId::Head {
            0
        } else {
            self.order.iter().position(|e| *e == after).map(|i| i + 1).unwrap_or(self.order.len())
        };
        let mut idx = start;
        while idx < self.order.len() {
            match self.order[idx].op_id() {
                Some(existing) if existing > new_id => idx += 1,
                _ => break,
            }
        }
        idx
    }
}

#[derive(Clone, Debug)]
pub enum Object {
    Map(MapObject),
    List(ListObject),
    Text(ListObject),
}

impl Object {
    pub fn new(ty: ObjType) -> Self {
        match ty {
            ObjType::Map => Object::Map(MapObject::default()),
            ObjType::List => Object::List(ListObject::default()),
            ObjType::Text => Object::Text(ListObject::default()),
        }
    }

    pub fn obj_type(&self) -> ObjType {
        match self {
            Object::Map(_) => ObjType::Map,
            Object::List(_) => ObjType::List,
            Object::Text(_) => ObjType::Text,
        }
    }

    pub fn as_list(&self) -> Option<&ListObject> {
        match self {
            Object::List(l) | Object::Text(l) => Some(l),
            Object::Map(_) => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut ListObject> {
        match self {
            Object::List(l) | Object::Text(l) => Some(l),
            Object::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapObject> {
        match self {
            Object::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut MapObject> {
        match self {
            Object::Map(m) => Some(m),
            _ => None,
        }
    }
}
