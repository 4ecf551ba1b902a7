//! `proptest` generators for documents, changes and ops, used by the
//! property tests alongside the op log. Plays the same role as a dedicated
//! CRDT generator module for lattice-law tests, retargeted from arbitrary
//! dot-stores to arbitrary changes.

use std::collections::BTreeSet;

use proptest::collection::vec;
use proptest::prelude::*;

use crate::id::{ActorId, ObjId};
use crate::op::{Key, Op};
use crate::value::ScalarValue;

pub fn arb_actor_id() -> impl Strategy<Value = ActorId> {
    any::<[u8; 16]>().prop_map(ActorId::new)
}

pub fn arb_scalar() -> impl Strategy<Value = ScalarValue> {
    prop_oneof![
        any::<i64>().prop_map(ScalarValue::Int),
        "[a-z]{1,8}".prop_map(ScalarValue::Str),
        any::<bool>().prop_map(ScalarValue::Bool),
        Just(ScalarValue::Null),
    ]
}

/// A single actor's ops over a small, fixed key space, chained into a valid
/// `seq`/`start_op` sequence of [`crate::change::Change`]s so property tests
/// can apply them through an [`crate::oplog::OpLog`] without also exercising
/// the transaction layer.
pub fn arb_single_actor_changes(
    actor: ActorId,
    change_count: usize,
    ops_per_change: usize,
) -> impl Strategy<Value = Vec<crate::change::Change>> {
    vec(vec((0..4usize, arb_scalar()), 1..=ops_per_change.max(1)), 1..=change_count.max(1)).prop_map(
        move |rounds| {
            let mut changes = Vec::new();
            let mut start_op = 1u64;
            let mut deps = Vec::new();
            for (seq, round) in rounds.into_iter().enumerate() {
                let ops: Vec<Op> = round
                    .into_iter()
                    .map(|(key_idx, value)| {
                        Op::set(ObjId::Root, Key::Map(format!("k{}", key_idx)), false, BTreeSet::new(), value)
                    })
                    .collect();
                let op_count = ops.len() as u64;
                let change = crate::change::Change {
                    actor,
                    seq: seq as u64 + 1,
                    start_op,
                    time: seq as i64,
                    message: None,
                    deps: deps.clone(),
                    ops,
                };
                deps = vec![change.hash()];
                start_op += op_count;
                changes.push(change);
            }
            changes
        },
    )
}
