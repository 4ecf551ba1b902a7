//! The change: an atomic, hashed, causally-linked bundle of operations (§3, §4.1).

use crate::encoding::{Reader, Writer};
use crate::error::DocError;
use crate::id::{ActorId, ChangeHash};
use crate::op::{actor_table, decode_ops, encode_ops, Op};

const MAGIC: [u8; 4] = *b"WFCH";
const VERSION: u8 = 1;

/// An atomic unit of replication: one actor's ops since their last change,
/// plus the causal deps it was written against.
#[derive(Clone, Debug)]
pub struct Change {
    pub actor: ActorId,
    pub seq: u64,
    pub start_op: u64,
    /// Milliseconds since the Unix epoch.
    pub time: i64,
    pub message: Option<String>,
    pub deps: Vec<ChangeHash>,
    pub ops: Vec<Op>,
}

impl Change {
    /// The op-id that the op at `index` within this change carries.
    pub fn op_id_at(&self, index: usize) -> crate::id::OpId {
        crate::id::OpId::new(self.start_op + index as u64, self.actor)
    }

    /// The highest op counter used by this change (§4.3: a change with
    /// `start_op = s` and `n` ops occupies counters `s ..= s + n - 1`).
    pub fn max_op(&self) -> u64 {
        self.start_op + self.ops.len() as u64 - 1
    }

    /// Canonical binary encoding. Two implementations that encode the same
    /// change content MUST produce byte-identical output, since the hash is
    /// computed over exactly these bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.fixed(&MAGIC);
        w.u8(VERSION);
        w.fixed(self.actor.as_ref());
        w.uvarint(self.seq);
        w.uvarint(self.start_op);
        w.ivarint(self.time);
        match &self.message {
            None => w.u8(0),
            Some(m) => {
                w.u8(1);
                w.str(m);
            }
        }
        w.uvarint(self.deps.len() as u64);
        for dep in &self.deps {
            w.fixed(dep.as_bytes());
        }

        let table = actor_table(&self.ops);
        w.uvarint(table.len() as u64);
        for actor in &table {
            w.fixed(actor.as_ref());
        }

        w.uvarint(self.ops.len() as u64);
        let (actions, objs, keys, inserts, values, preds) = encode_ops(&self.ops, &table);
        for column in [actions, objs, keys, inserts, values, preds] {
            w.bytes_with_len(column.bytes());
        }

        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DocError> {
        let mut r = Reader::new(bytes);
        if r.fixed(4)? != MAGIC {
            return Err(DocError::DecodeError);
        }
        if r.u8()? != VERSION {
            return Err(DocError::DecodeError);
        }
        let actor = ActorId::new(r.fixed_array()?);
        let seq = r.uvarint()?;
        let start_op = r.uvarint()?;
        let time = r.ivarint()?;
        let message = match r.u8()? {
            0 => None,
            1 => Some(r.str()?.to_owned()),
            _ => return Err(DocError::DecodeError),
        };
        let dep_count = r.uvarint()?;
        let mut deps = Vec::with_capacity(dep_count as usize);
        for _ in 0..dep_count {
            deps.push(ChangeHash(r.fixed_array()?));
        }

        let table_len = r.uvarint()?;
        let mut table = Vec::with_capacity(table_len as usize);
        for _ in 0..table_len {
            table.push(ActorId::new(r.fixed_array()?));
        }

        let op_count = r.uvarint()? as usize;
        let mut columns = Vec::with_capacity(6);
        for _ in 0..6 {
            columns.push(r.bytes_with_len()?);
        }
        let mut actions = Reader::new(columns[0]);
        let mut objs = Reader::new(columns[1]);
        let mut keys = Reader::new(columns[2]);
        let mut inserts = Reader::new(columns[3]);
        let mut values = Reader::new(columns[4]);
        let mut preds = Reader::new(columns[5]);
        let ops = decode_ops(
            op_count, &table, &mut actions, &mut objs, &mut keys, &mut inserts, &mut values,
            &mut preds,
        )?;

        Ok(Change { actor, seq, start_op, time, message, deps, ops })
    }

    /// Content hash of this change's canonical encoding.
    pub fn hash(&self) -> ChangeHash {
        ChangeHash::of(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ElemId, ObjId};
    use crate::op::Key;
    use crate::value::ScalarValue;
    use std::collections::BTreeSet;

    fn sample_change() -> Change {
        let actor = ActorId::new([7; 16]);
        Change {
            actor,
            seq: 1,
            start_op: 1,
            time: 1_700_000_000_000,
            message: Some("hello".into()),
            deps: vec![],
            ops: vec![Op::set(
                ObjId::Root,
                Key::Map("bird".into()),
                false,
                BTreeSet::new(),
                ScalarValue::Str("magpie".into()),
            )],
        }
    }

    #[test]
    fn change_roundtrips() {
        let change = sample_change();
        let bytes = change.encode();
        let decoded = Change::decode(&bytes).unwrap();
        assert_eq!(decoded.actor, change.actor);
        assert_eq!(decoded.seq, change.seq);
        assert_eq!(decoded.ops.len(), 1);
    }

    #[test]
    fn encoding_is_deterministic() {
        let change = sample_change();
        assert_eq!(change.encode(), change.encode());
        assert_eq!(change.hash(), change.hash());
    }

    #[test]
    fn encode_preserves_foreign_actor_refs() {
        let other = ActorId::new([9; 16]);
        let mut change = sample_change();
        change.ops.push(Op::del(
            ObjId::Op(crate::id::OpId::new(1, other)),
            Key::Seq(ElemId::Op(crate::id::OpId::new(2, other))),
            BTreeSet::from([crate::id::OpId::new(2, other)]),
        ));
        let decoded = Change::decode(&change.encode()).unwrap();
        match decoded.ops[1].obj {
            ObjId::Op(id) => assert_eq!(id.actor, other),
            _ => panic!("expected op ref"),
        }
    }

    #[test]
    fn encode_does_not_panic_when_a_marks_end_actor_is_foreign() {
        // The mark's `obj`/`start`/`pred` all belong to `sample_change`'s own
        // actor; only the range's *end* elem-id is authored by a different
        // actor (e.g. that position was inserted by a remote peer). The
        // actor table must still pick it up or encoding panics.
        let other = ActorId::new([9; 16]);
        let mut change = sample_change();
        change.ops.push(Op::mark(
            ObjId::Root,
            ElemId::Head,
            ElemId::Op(crate::id::OpId::new(5, other)),
            BTreeSet::new(),
            crate::value::MarkData {
                name: "bold".into(),
                value: ScalarValue::Bool(true),
                expand: crate::value::Expand::None,
            },
        ));
        let decoded = Change::decode(&change.encode()).unwrap();
        match &decoded.ops[1].action {
            crate::op::OpType::Mark(ElemId::Op(id), _) => assert_eq!(id.actor, other),
            other => panic!("expected mark op, got {:?}", other),
        }
    }
}
