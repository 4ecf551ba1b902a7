//! The op log & causal index (§4.1): stores the deduplicated set of changes,
//! maintains `heads`, and buffers changes that arrive before their deps.

use std::collections::{BTreeSet, HashSet};
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use fnv::FnvHashMap;

use crate::change::Change;
use crate::error::DocError;
use crate::id::{ActorId, ChangeHash};
use crate::materializer::Materializer;
use crate::patch::Patch;

const SAVE_MAGIC: [u8; 4] = *b"WFDS";
const SAVE_VERSION: u8 = 1;
/// Columns (here: the whole concatenated change buffer) at or above this
/// size are DEFLATE-compressed on save (§4.1, §6).
const COMPRESSION_THRESHOLD: usize = 512;

#[derive(Clone, Debug, Default)]
pub struct OpLog {
    changes: FnvHashMap<ChangeHash, Change>,
    /// Changes buffered because a dep (or actor seq predecessor) is missing.
    pending: FnvHashMap<ChangeHash, Change>,
    heads: BTreeSet<ChangeHash>,
    actor_seq: FnvHashMap<ActorId, u64>,
    tree: Materializer,
}

impl OpLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heads(&self) -> BTreeSet<ChangeHash> {
        self.heads.clone()
    }

    pub fn tree(&self) -> &Materializer {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Materializer {
        &mut self.tree
    }

    /// Records a change whose ops have already been applied to the tree
    /// (used by [`crate::transaction::Transaction::commit`], which applies
    /// each op as it is synthesised rather than waiting for commit).
    pub fn record_local(&mut self, change: Change) -> ChangeHash {
        let hash = change.hash();
        for dep in &change.deps {
            self.heads.remove(dep);
        }
        self.heads.insert(hash);
        self.actor_seq.insert(change.actor, change.seq);
        self.changes.insert(hash, change);
        hash
    }

    /// The highest op counter used anywhere in the log, or 0 for an empty log.
    pub fn max_op(&self) -> u64 {
        self.changes.values().map(Change::max_op).max().unwrap_or(0)
    }

    pub fn actor_seq(&self, actor: ActorId) -> u64 {
        self.actor_seq.get(&actor).copied().unwrap_or(0)
    }

    pub fn get_change(&self, hash: &ChangeHash) -> Option<&Change> {
        self.changes.get(hash)
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Applies a change, buffering it if its deps or actor-seq predecessor
    /// are not yet present (the default, non-strict behaviour of §4.7).
    /// Re-applying an already-seen change is idempotent and returns an empty
    /// patch. Returns the combined patch of this change and any previously
    /// buffered changes it unblocks.
    pub fn apply_change(&mut self, change: Change) -> Result<Patch, DocError> {
        let hash = change.hash();
        if self.changes.contains_key(&hash) {
            return Ok(Patch::new());
        }
        self.pending.insert(hash, change);
        self.drain_pending()
    }

    /// Like [`Self::apply_change`] but fails instead of buffering when
    /// preconditions are unmet, for callers that want strict ordering.
    pub fn apply_change_strict(&mut self, change: Change) -> Result<Patch, DocError> {
        let hash = change.hash();
        if self.changes.contains_key(&hash) {
            return Ok(Patch::new());
        }
        let missing = change.deps.iter().filter(|d| !self.changes.contains_key(d)).count();
        if missing > 0 {
            return Err(DocError::MissingDeps(missing));
        }
        let expected = self.actor_seq(change.actor) + 1;
        if change.seq != expected {
            return Err(DocError::OutOfOrder { actor: change.actor, expected, got: change.seq });
        }
        self.commit(change)
    }

    fn ready(&self, change: &Change) -> bool {
        let deps_ready = change.deps.iter().all(|d| self.changes.contains_key(d));
        let seq_ready = change.seq == self.actor_seq(change.actor) + 1;
        deps_ready && seq_ready
    }

    fn drain_pending(&mut self) -> Result<Patch, DocError> {
        let mut patch = Patch::new();
        loop {
            let ready_hash = self
                .pending
                .iter()
                .find(|(_, c)| self.ready(c))
                .map(|(h, _)| *h);
            let Some(hash) = ready_hash else { break };
            let change = self.pending.remove(&hash).expect("just found");
            patch.extend(self.commit(change)?);
        }
        Ok(patch)
    }

    fn commit(&mut self, change: Change) -> Result<Patch, DocError> {
        let hash = change.hash();
        let mut patch = Patch::new();
        for (i, op) in change.ops.iter().enumerate() {
            let id = change.op_id_at(i);
            self.tree.apply_op(id, op)?;
            patch.push(id, op.clone());
        }
        for dep in &change.deps {
            self.heads.remove(dep);
        }
        self.heads.insert(hash);
        self.actor_seq.insert(change.actor, change.seq);
        self.changes.insert(hash, change);
        Ok(patch)
    }

    /// Changes a peer who already has `have` (and, transitively, everything
    /// `have` depends on) still needs to reach our current heads, in
    /// dependency order.
    pub fn get_changes(&self, have: &BTreeSet<ChangeHash>) -> Vec<&Change> {
        let wanted = self.ancestors_not_in(self.heads.iter().copied(), have);
        self.topo_sort(&wanted).into_iter().map(|h| &self.changes[&h]).collect()
    }

    /// The net effect of everything in `to`'s causal history that isn't
    /// already implied by `from`. `apply`ing the result against the value at
    /// `from` reproduces the value at `to` (§4.2).
    pub fn diff(&self, from: &BTreeSet<ChangeHash>, to: &BTreeSet<ChangeHash>) -> Patch {
        let wanted = self.ancestors_not_in(to.iter().copied(), from);
        let mut patch = Patch::new();
        for hash in self.topo_sort(&wanted) {
            let change = &self.changes[&hash];
            for (i, op) in change.ops.iter().enumerate() {
                patch.push(change.op_id_at(i), op.clone());
            }
        }
        patch
    }

    fn ancestors_not_in(
        &self,
        starts: impl Iterator<Item = ChangeHash>,
        have: &BTreeSet<ChangeHash>,
    ) -> HashSet<ChangeHash> {
        let mut seen = HashSet::new();
        let mut stack: Vec<ChangeHash> = starts.filter(|h| !have.contains(h)).collect();
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue;
            }
            if let Some(change) = self.changes.get(&hash) {
                for dep in &change.deps {
                    if !have.contains(dep) {
                        stack.push(*dep);
                    }
                }
            }
        }
        seen
    }

    /// Topologically sorts `subset`. The result must be a pure function of
    /// the change set alone — iterating a `HashSet`'s `RandomState` order
    /// would make concurrent changes (siblings in the DAG, free to come out
    /// in either order) land differently across runs, breaking §8
    /// determinism for `save`/`get_changes`/`diff`. Seeds and each change's
    /// deps are therefore sorted (`ChangeHash`'s `Ord`) before traversal.
    fn topo_sort(&self, subset: &HashSet<ChangeHash>) -> Vec<ChangeHash> {
        let mut visited = HashSet::new();
        let mut out = Vec::with_capacity(subset.len());
        let mut seeds: Vec<ChangeHash> = subset.iter().copied().collect();
        seeds.sort();
        for hash in seeds {
            self.topo_visit(hash, subset, &mut visited, &mut out);
        }
        out
    }

    fn topo_visit(
        &self,
        hash: ChangeHash,
        subset: &HashSet<ChangeHash>,
        visited: &mut HashSet<ChangeHash>,
        out: &mut Vec<ChangeHash>,
    ) {
        if !visited.insert(hash) {
            return;
        }
        if let Some(change) = self.changes.get(&hash) {
            let mut deps: Vec<ChangeHash> = change.deps.clone();
            deps.sort();
            for dep in deps {
                if subset.contains(&dep) {
                    self.topo_visit(dep, subset, visited, out);
                }
            }
        }
        out.push(hash);
    }

    /// A cheap fork: the log and cached tree are plain owned data, so this is
    /// a clone, but callers should treat the result as sharing no further
    /// mutation with the original.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn merge(&mut self, other: &OpLog) -> Result<Patch, DocError> {
        let mut patch = Patch::new();
        for hash in other.topo_sort(&other.changes.keys().copied().collect()) {
            let change = other.changes[&hash].clone();
            patch.extend(self.apply_change(change)?);
        }
        Ok(patch)
    }

    /// Serialises every change into one column-oriented blob, DEFLATE-compressing
    /// the whole thing when it is large enough that compression pays for itself.
    pub fn save(&self) -> Vec<u8> {
        let all: HashSet<ChangeHash> = self.changes.keys().copied().collect();
        let order = self.topo_sort(&all);

        let mut body = crate::encoding::Writer::new();
        body.uvarint(order.len() as u64);
        for hash in &order {
            body.bytes_with_len(&self.changes[hash].encode());
        }
        let body = body.into_bytes();

        let mut out = crate::encoding::Writer::new();
        out.fixed(&SAVE_MAGIC);
        out.u8(SAVE_VERSION);
        if body.len() >= COMPRESSION_THRESHOLD {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body).expect("in-memory write cannot fail");
            let compressed = encoder.finish().expect("in-memory write cannot fail");
            out.u8(1);
            out.bytes_with_len(&compressed);
        } else {
            out.u8(0);
            out.bytes_with_len(&body);
        }
        out.into_bytes()
    }

    pub fn load(bytes: &[u8]) -> Result<Self, DocError> {
        let mut r = crate::encoding::Reader::new(bytes);
        if r.fixed(4)? != SAVE_MAGIC {
            return Err(DocError::DecodeError);
        }
        if r.u8()? != SAVE_VERSION {
            return Err(DocError::DecodeError);
        }
        let compressed = r.u8()? != 0;
        let body_bytes = r.bytes_with_len()?;
        let body_owned;
        let body: &[u8] = if compressed {
            let mut decoder = DeflateDecoder::new(body_bytes);
            let mut buf = Vec::new();
            decoder.read_to_end(&mut buf).map_err(|_| DocError::DecodeError)?;
            body_owned = buf;
            &body_owned
        } else {
            body_bytes
        };

        let mut body_r = crate::encoding::Reader::new(body);
        let count = body_r.uvarint()?;
        let mut log = OpLog::new();
        for _ in 0..count {
            let change_bytes = body_r.bytes_with_len()?;
            let change = Change::decode(change_bytes)?;
            log.apply_change_strict(change)?;
        }
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ObjId;
    use crate::op::{Key, Op};
    use crate::value::ScalarValue;
    use std::collections::BTreeSet as Set;

    fn change(actor: ActorId, seq: u64, deps: Vec<ChangeHash>, key: &str, val: &str) -> Change {
        Change {
            actor,
            seq,
            start_op: seq,
            time: 0,
            message: None,
            deps,
            ops: vec![Op::set(ObjId::Root, Key::Map(key.into()), false, Set::new(), ScalarValue::Str(val.into()))],
        }
    }

    #[test]
    fn applies_in_order_and_tracks_heads() {
        let actor = ActorId::new([1; 16]);
        let mut log = OpLog::new();
        let c1 = change(actor, 1, vec![], "a", "1");
        let h1 = c1.hash();
        log.apply_change(c1).unwrap();
        assert_eq!(log.heads(), Set::from([h1]));

        let c2 = change(actor, 2, vec![h1], "a", "2");
        let h2 = c2.hash();
        log.apply_change(c2).unwrap();
        assert_eq!(log.heads(), Set::from([h2]));
    }

    #[test]
    fn buffers_out_of_order_changes() {
        let actor = ActorId::new([1; 16]);
        let c1 = change(actor, 1, vec![], "a", "1");
        let h1 = c1.hash();
        let c2 = change(actor, 2, vec![h1], "a", "2");
        let h2 = c2.hash();

        let mut log = OpLog::new();
        log.apply_change(c2).unwrap();
        assert!(log.heads().is_empty(), "change 2 cannot apply before change 1 arrives");
        log.apply_change(c1).unwrap();
        assert_eq!(log.heads(), Set::from([h2]));
    }

    #[test]
    fn reapplying_a_change_is_idempotent() {
        let actor = ActorId::new([1; 16]);
        let c1 = change(actor, 1, vec![], "a", "1");
        let mut log = OpLog::new();
        log.apply_change(c1.clone()).unwrap();
        let heads_before = log.heads();
        let patch = log.apply_change(c1).unwrap();
        assert!(patch.is_empty());
        assert_eq!(log.heads(), heads_before);
    }

    proptest::proptest! {
        /// §8: applying a causally valid chain of changes to a fresh log
        /// converges to the same heads and change count no matter whether it
        /// arrives in order or scrambled (buffering handles the reordering).
        #[test]
        fn converges_regardless_of_arrival_order(
            changes in crate::props::arb_single_actor_changes(ActorId::new([7; 16]), 6, 3),
            seed in any::<u64>(),
        ) {
            let mut in_order = OpLog::new();
            for c in &changes {
                in_order.apply_change(c.clone()).unwrap();
            }

            let mut scrambled_changes = changes.clone();
            // A cheap deterministic shuffle so the test stays reproducible
            // under proptest's shrinking without pulling in a RNG crate.
            let len = scrambled_changes.len();
            for i in 0..len {
                let j = (seed as usize).wrapping_add(i).wrapping_mul(2654435761) % len;
                scrambled_changes.swap(i, j);
            }
            let mut scrambled = OpLog::new();
            for c in scrambled_changes {
                scrambled.apply_change(c).unwrap();
            }

            proptest::prop_assert_eq!(in_order.heads(), scrambled.heads());
            proptest::prop_assert_eq!(in_order.len(), scrambled.len());
        }
    }

    #[test]
    fn strict_mode_rejects_seq_gap() {
        let actor = ActorId::new([1; 16]);
        let mut log = OpLog::new();
        let c2 = change(actor, 2, vec![], "a", "2");
        let err = log.apply_change_strict(c2).unwrap_err();
        assert!(matches!(err, DocError::OutOfOrder { expected: 1, got: 2, .. }));
    }

    #[test]
    fn strict_mode_rejects_missing_deps() {
        let actor = ActorId::new([1; 16]);
        let missing = ChangeHash::of(b"never-seen");
        let mut log = OpLog::new();
        let c1 = change(actor, 1, vec![missing], "a", "1");
        let err = log.apply_change_strict(c1).unwrap_err();
        assert!(matches!(err, DocError::MissingDeps(1)));
    }

    /// §8 determinism: two logs that received the same *concurrent* change
    /// set in different arrival orders must still emit byte-identical
    /// `save()` output, because the topological sort's handling of sibling
    /// changes (neither depends on the other) must not depend on `HashSet`
    /// iteration order.
    #[test]
    fn save_bytes_are_independent_of_concurrent_change_arrival_order() {
        let actor_a = ActorId::new([1; 16]);
        let actor_b = ActorId::new([2; 16]);
        let c_a = change(actor_a, 1, vec![], "a", "1");
        let c_b = change(actor_b, 1, vec![], "b", "2");
        let h_a = c_a.hash();
        let h_b = c_b.hash();
        let c_merge = change(actor_a, 2, vec![h_a, h_b], "a", "3");

        let mut first = OpLog::new();
        first.apply_change(c_a.clone()).unwrap();
        first.apply_change(c_b.clone()).unwrap();
        first.apply_change(c_merge.clone()).unwrap();

        let mut second = OpLog::new();
        second.apply_change(c_b).unwrap();
        second.apply_change(c_a).unwrap();
        second.apply_change(c_merge).unwrap();

        assert_eq!(first.save(), second.save());
    }

    #[test]
    fn save_load_roundtrips() {
        let actor = ActorId::new([1; 16]);
        let mut log = OpLog::new();
        let c1 = change(actor, 1, vec![], "a", "1");
        let h1 = c1.hash();
        log.apply_change(c1).unwrap();
        let c2 = change(actor, 2, vec![h1], "a", "2");
        log.apply_change(c2).unwrap();

        let bytes = log.save();
        let reloaded = OpLog::load(&bytes).unwrap();
        assert_eq!(reloaded.heads(), log.heads());
        assert_eq!(reloaded.len(), log.len());
    }
}
