//! Operations: the smallest mutation unit, and their column-oriented encoding.
//!
//! A single in-memory [`Op`] corresponds to one row across the six columns
//! the change format lays the op list out in (§4.1/§6): actions, objects,
//! keys, insert-flags, values and pred-lists. Encoding one column at a time
//! rather than one op at a time is what lets the bulk save format compress
//! each column independently later.

use std::collections::BTreeSet;

use crate::encoding::{Reader, Writer};
use crate::error::DocError;
use crate::id::{ActorId, ElemId, ObjId, OpId};
use crate::value::{MarkData, ObjType, ScalarValue};

/// Either a map key or the stable position identity of a sequence element.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Key {
    Map(String),
    Seq(ElemId),
}

/// What an operation does. `insert` on [`Op`] governs whether `Set`/`Make`
/// grow the sequence (new position) or overwrite an existing one; `key` is
/// the anchor position (`insert == true`: insert after `key`; `insert ==
/// false`: replace the value living at `key`).
#[derive(Clone, Debug)]
pub enum OpType {
    Make(ObjType),
    Set(ScalarValue),
    Del,
    Inc(i64),
    /// `key` on the owning [`Op`] is the start of the range; the element id
    /// here is its end.
    Mark(ElemId, MarkData),
}

impl OpType {
    fn tag(&self) -> u8 {
        match self {
            OpType::Make(_) => 0,
            OpType::Set(_) => 1,
            OpType::Del => 2,
            OpType::Inc(_) => 3,
            OpType::Mark(..) => 4,
        }
    }
}

/// A single mutation, addressed within its change by position (its `opId` is
/// `(change.start_op + index, change.actor)` and is never stored explicitly).
#[derive(Clone, Debug)]
pub struct Op {
    pub obj: ObjId,
    pub key: Key,
    pub insert: bool,
    pub pred: BTreeSet<OpId>,
    pub action: OpType,
}

impl Op {
    pub fn make(obj: ObjId, key: Key, insert: bool, pred: BTreeSet<OpId>, ty: ObjType) -> Self {
        Self {
            obj,
            key,
            insert,
            pred,
            action: OpType::Make(ty),
        }
    }

    pub fn set(obj: ObjId, key: Key, insert: bool, pred: BTreeSet<OpId>, value: ScalarValue) -> Self {
        Self {
            obj,
            key,
            insert,
            pred,
            action: OpType::Set(value),
        }
    }

    pub fn del(obj: ObjId, key: Key, pred: BTreeSet<OpId>) -> Self {
        Self {
            obj,
            key,
            insert: false,
            pred,
            action: OpType::Del,
        }
    }

    pub fn inc(obj: ObjId, key: Key, pred: BTreeSet<OpId>, delta: i64) -> Self {
        Self {
            obj,
            key,
            insert: false,
            pred,
            action: OpType::Inc(delta),
        }
    }

    pub fn mark(obj: ObjId, start: ElemId, end: ElemId, pred: BTreeSet<OpId>, mark: MarkData) -> Self {
        Self {
            obj,
            key: Key::Seq(start),
            insert: false,
            pred,
            action: OpType::Mark(end, mark),
        }
    }
}

/// Collects the actor ids referenced by a run of ops (outside of the op's own
/// implicit id) into a deduplicated, sorted table so that obj/key/pred
/// references can be written as a small table index instead of 16 raw bytes.
pub(crate) fn actor_table(ops: &[Op]) -> Vec<ActorId> {
    let mut set = BTreeSet::new();
    for op in ops {
        if let ObjId::Op(id) = op.obj {
            set.insert(id.actor);
        }
        if let Key::Seq(ElemId::Op(id)) = &op.key {
            set.insert(id.actor);
        }
        for pred in &op.pred {
            set.insert(pred.actor);
        }
        if let OpType::Mark(ElemId::Op(id), _) = &op.action {
            set.insert(id.actor);
        }
    }
    set.into_iter().collect()
}

fn write_op_id(w: &mut Writer, table: &[ActorId], id: OpId) {
    let idx = table.binary_search(&id.actor).expect("actor missing from table");
    w.uvarint(idx as u64);
    w.uvarint(id.counter);
}

fn read_op_id(r: &mut Reader, table: &[ActorId]) -> Result<OpId, DocError> {
    let idx = r.uvarint()? as usize;
    let actor = *table.get(idx).ok_or(DocError::DecodeError)?;
    let counter = r.uvarint()?;
    Ok(OpId::new(counter, actor))
}

pub(crate) fn encode_ops(ops: &[Op], table: &[ActorId]) -> (Writer, Writer, Writer, Writer, Writer, Writer) {
    let mut actions = Writer::new();
    let mut objs = Writer::new();
    let mut keys = Writer::new();
    let mut inserts = Writer::new();
    let mut values = Writer::new();
    let mut preds = Writer::new();

    for op in ops {
        actions.u8(op.action.tag());
        inserts.u8(op.insert as u8);

        match op.obj {
            ObjId::Root => objs.u8(0),
            ObjId::Op(id) => {
                objs.u8(1);
                write_op_id(&mut objs, table, id);
            }
        }

        match &op.key {
            Key::Map(s) => {
                keys.u8(0);
                keys.str(s);
            }
            Key::Seq(ElemId::Head) => keys.u8(1),
            Key::Seq(ElemId::Op(id)) => {
                keys.u8(2);
                write_op_id(&mut keys, table, *id);
            }
        }

        preds.uvarint(op.pred.len() as u64);
        for pred in &op.pred {
            write_op_id(&mut preds, table, *pred);
        }

        match &op.action {
            OpType::Make(ty) => values.u8(ty.tag()),
            OpType::Set(v) => v.encode(&mut values),
            OpType::Del => {}
            OpType::Inc(delta) => values.ivarint(*delta),
            OpType::Mark(end, m) => {
                match end {
                    ElemId::Head => values.u8(0),
                    ElemId::Op(id) => {
                        values.u8(1);
                        write_op_id(&mut values, table, *id);
                    }
                }
                values.str(&m.name);
                m.value.encode(&mut values);
                values.u8(m.expand.tag());
            }
        }
    }

    (actions, objs, keys, inserts, values, preds)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn decode_ops(
    count: usize,
    table: &[ActorId],
    actions: &mut Reader,
    objs: &mut Reader,
    keys: &mut Reader,
    inserts: &mut Reader,
    values: &mut Reader,
    preds: &mut Reader,
) -> Result<Vec<Op>, DocError> {
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let action_tag = actions.u8()?;
        let insert = inserts.u8()? != 0;

        let obj = match objs.u8()? {
            0 => ObjId::Root,
            1 => ObjId::Op(read_op_id(objs, table)?),
            _ => return Err(DocError::DecodeError),
        };

        let key = match keys.u8()? {
            0 => Key::Map(keys.str()?.to_owned()),
            1 => Key::Seq(ElemId::Head),
            2 => Key::Seq(ElemId::Op(read_op_id(keys, table)?)),
            _ => return Err(DocError::DecodeError),
        };

        let pred_count = preds.uvarint()?;
        let mut pred = BTreeSet::new();
        for _ in 0..pred_count {
            pred.insert(read_op_id(preds, table)?);
        }

        let action = match action_tag {
            0 => OpType::Make(ObjType::from_tag(values.u8()?)?),
            1 => OpType::Set(ScalarValue::decode(values)?),
            2 => OpType::Del,
            3 => OpType::Inc(values.ivarint()?),
            4 => {
                let end = match values.u8()? {
                    0 => ElemId::Head,
                    1 => ElemId::Op(read_op_id(values, table)?),
                    _ => return Err(DocError::DecodeError),
                };
                let name = values.str()?.to_owned();
                let value = ScalarValue::decode(values)?;
                let expand = crate::value::Expand::from_tag(values.u8()?)?;
                OpType::Mark(end, MarkData { name, value, expand })
            }
            _ => return Err(DocError::DecodeError),
        };

        ops.push(Op { obj, key, insert, pred, action });
    }
    Ok(ops)
}
