//! The sync protocol (§4.6): converges two replicas by exchanging compact
//! messages instead of replaying the full op log.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::change::Change;
use crate::encoding::{Reader, Writer};
use crate::error::DocError;
use crate::id::ChangeHash;
use crate::oplog::OpLog;
use crate::patch::Patch;

/// Bits per Bloom filter. Two implementations MUST agree on this and
/// [`BLOOM_HASHES`] — a mismatch degrades the filter to more false positives
/// (extra changes get resent) but never breaks correctness, since `need` is
/// always honoured regardless of what the filter says.
pub const BLOOM_BITS: usize = 2048;
pub const BLOOM_HASHES: usize = 4;

#[derive(Clone, Debug)]
pub struct Bloom {
    bits: Vec<u8>,
}

impl Bloom {
    fn empty() -> Self {
        Self { bits: vec![0; BLOOM_BITS / 8] }
    }

    pub fn from_hashes<'a>(hashes: impl Iterator<Item = &'a ChangeHash>) -> Self {
        let mut bloom = Self::empty();
        for hash in hashes {
            bloom.insert(hash);
        }
        bloom
    }

    fn insert(&mut self, hash: &ChangeHash) {
        for i in 0..BLOOM_HASHES {
            let idx = Self::bit_index(hash, i);
            self.bits[idx / 8] |= 1 << (idx % 8);
        }
    }

    pub fn might_contain(&self, hash: &ChangeHash) -> bool {
        (0..BLOOM_HASHES).all(|i| {
            let idx = Self::bit_index(hash, i);
            self.bits[idx / 8] & (1 << (idx % 8)) != 0
        })
    }

    fn bit_index(hash: &ChangeHash, seed: usize) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(hash.as_bytes());
        hasher.update([seed as u8]);
        let digest = hasher.finalize();
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&digest[0..8]);
        (u64::from_le_bytes(buf) as usize) % BLOOM_BITS
    }

    fn encode(&self, w: &mut Writer) {
        w.fixed(&self.bits);
    }

    fn decode(r: &mut Reader) -> Result<Self, DocError> {
        Ok(Self { bits: r.fixed(BLOOM_BITS / 8)?.to_vec() })
    }
}

#[derive(Clone, Debug)]
pub struct Have {
    pub last_sync: BTreeSet<ChangeHash>,
    pub bloom: Bloom,
}

#[derive(Clone, Debug)]
pub struct SyncMessage {
    pub heads: BTreeSet<ChangeHash>,
    pub need: Vec<ChangeHash>,
    pub have: Vec<Have>,
    pub changes: Vec<Change>,
}

const SYNC_MAGIC: [u8; 4] = *b"WFSY";
const SYNC_VERSION: u8 = 1;

impl SyncMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.fixed(&SYNC_MAGIC);
        w.u8(SYNC_VERSION);
        w.uvarint(self.heads.len() as u64);
        for h in &self.heads {
            w.fixed(h.as_bytes());
        }
        w.uvarint(self.need.len() as u64);
        for h in &self.need {
            w.fixed(h.as_bytes());
        }
        w.uvarint(self.have.len() as u64);
        for have in &self.have {
            w.uvarint(have.last_sync.len() as u64);
            for h in &have.last_sync {
                w.fixed(h.as_bytes());
            }
            have.bloom.encode(&mut w);
        }
        w.uvarint(self.changes.len() as u64);
        for change in &self.changes {
            w.bytes_with_len(&change.encode());
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DocError> {
        let mut r = Reader::new(bytes);
        if r.fixed(4)? != SYNC_MAGIC {
            return Err(DocError::DecodeError);
        }
        if r.u8()? != SYNC_VERSION {
            return Err(DocError::DecodeError);
        }
        let mut heads = BTreeSet::new();
        for _ in 0..r.uvarint()? {
            heads.insert(ChangeHash(r.fixed_array()?));
        }
        let mut need = Vec::new();
        for _ in 0..r.uvarint()? {
            need.push(ChangeHash(r.fixed_array()?));
        }
        let mut have = Vec::new();
        for _ in 0..r.uvarint()? {
            let mut last_sync = BTreeSet::new();
            for _ in 0..r.uvarint()? {
                last_sync.insert(ChangeHash(r.fixed_array()?));
            }
            let bloom = Bloom::decode(&mut r)?;
            have.push(Have { last_sync, bloom });
        }
        let mut changes = Vec::new();
        for _ in 0..r.uvarint()? {
            changes.push(Change::decode(r.bytes_with_len()?)?);
        }
        Ok(SyncMessage { heads, need, have, changes })
    }
}

/// Per-peer sync state, carried across repeated `generate`/`receive` rounds.
#[derive(Clone, Debug, Default)]
pub struct SyncState {
    pub shared_heads: BTreeSet<ChangeHash>,
    pub their_heads: Option<BTreeSet<ChangeHash>>,
    pub their_need: Vec<ChangeHash>,
    pub their_have: Vec<Have>,
    pub sent_hashes: BTreeSet<ChangeHash>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Generates the next message to send this peer, or `None` once neither side
/// has anything left to say (§4.6 step 3).
pub fn generate_message(oplog: &OpLog, state: &mut SyncState) -> Option<SyncMessage> {
    let our_heads = oplog.heads();
    let mut changes_to_send: Vec<Change> = Vec::new();

    for hash in &state.their_need {
        if let Some(change) = oplog.get_change(hash) {
            if !changes_to_send.iter().any(|c| &c.hash() == hash) {
                changes_to_send.push(change.clone());
            }
        }
    }

    let candidates = oplog.get_changes(&state.shared_heads);
    for change in candidates {
        let hash = change.hash();
        if state.sent_hashes.contains(&hash) {
            continue;
        }
        if changes_to_send.iter().any(|c| c.hash() == hash) {
            continue;
        }
        // Skip only with positive evidence (a bloom filter from a prior
        // message) that the peer already has it. With no evidence yet we err
        // on the side of sending — a false "might already have it" would be a
        // correctness bug, a false "needs it" just costs one redundant change.
        let peer_probably_has_it = state.their_have.iter().any(|have| have.bloom.might_contain(&hash));
        if peer_probably_has_it {
            continue;
        }
        changes_to_send.push(change.clone());
    }

    let converged = state.their_heads.as_ref() == Some(&our_heads)
        && changes_to_send.is_empty()
        && state.their_need.is_empty();
    if converged {
        return None;
    }

    for change in &changes_to_send {
        state.sent_hashes.insert(change.hash());
    }

    let our_need: Vec<ChangeHash> = state
        .their_heads
        .as_ref()
        .map(|their_heads| their_heads.iter().filter(|h| oplog.get_change(h).is_none()).copied().collect())
        .unwrap_or_default();

    let have_hashes: Vec<ChangeHash> = oplog.get_changes(&state.shared_heads).iter().map(|c| c.hash()).collect();
    Some(SyncMessage {
        heads: our_heads,
        need: our_need,
        have: vec![Have { last_sync: state.shared_heads.clone(), bloom: Bloom::from_hashes(have_hashes.iter()) }],
        changes: changes_to_send,
    })
}

/// Applies an incoming message: merges any carried changes and updates the
/// peer's advertised state so the next `generate_message` call knows what to
/// send next.
pub fn receive_message(oplog: &mut OpLog, state: &mut SyncState, message: SyncMessage) -> Result<Patch, DocError> {
    state.their_heads = Some(message.heads.clone());
    state.their_need = message.need;
    state.their_have = message.have.clone();

    let mut patch = Patch::new();
    for change in message.changes {
        patch.extend(oplog.apply_change(change)?);
    }

    let our_heads = oplog.heads();
    if our_heads == message.heads {
        state.shared_heads = our_heads;
    } else {
        let common: BTreeSet<ChangeHash> = state.shared_heads.union(&message.heads.intersection(&our_heads).copied().collect()).copied().collect();
        state.shared_heads = common;
    }
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ActorId;

    #[test]
    fn bloom_filter_has_no_false_negatives() {
        let a = ChangeHash::of(b"a");
        let b = ChangeHash::of(b"b");
        let bloom = Bloom::from_hashes([a].iter());
        assert!(bloom.might_contain(&a));
        let _ = b; // b may or may not be a false positive, that's allowed
    }

    #[test]
    fn sync_converges_from_empty_peer() {
        let actor = ActorId::new([1; 16]);
        let mut a = OpLog::new();
        for i in 1..=5u64 {
            let change = crate::change::Change {
                actor,
                seq: i,
                start_op: i,
                time: 0,
                message: None,
                deps: if i == 1 { vec![] } else { vec![a.heads().into_iter().next().unwrap()] },
                ops: vec![crate::op::Op::set(
                    crate::id::ObjId::Root,
                    crate::op::Key::Map(format!("k{}", i)),
                    false,
                    Default::default(),
                    crate::value::ScalarValue::Int(i as i64),
                )],
            };
            a.apply_change(change).unwrap();
        }
        let mut b = OpLog::new();

        let mut state_a = SyncState::new();
        let mut state_b = SyncState::new();

        for _ in 0..10 {
            let mut progressed = false;
            if let Some(msg) = generate_message(&a, &mut state_a) {
                receive_message(&mut b, &mut state_b, msg).unwrap();
                progressed = true;
            }
            if let Some(msg) = generate_message(&b, &mut state_b) {
                receive_message(&mut a, &mut state_a, msg).unwrap();
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        assert_eq!(a.heads(), b.heads());
        assert_eq!(a.len(), b.len());
    }
}
