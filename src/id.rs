//! Identities used throughout the engine: documents, actors, operations and changes.
//!
//! [`OpId`] is the load-bearing type here: its derived `Ord` gives the Lamport
//! order the rest of the crate relies on (counter dominates, actor id breaks ties).

use std::fmt;
use std::str::FromStr;

/// Opaque per-document identifier.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct DocId([u8; 16]);

impl DocId {
    pub fn new(id: [u8; 16]) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        let mut buf = [0; 16];
        getrandom::getrandom(&mut buf).expect("failed to access system RNG");
        Self(buf)
    }
}

impl AsRef<[u8; 16]> for DocId {
    fn as_ref(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for DocId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DocId({})", self)
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for DocId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            anyhow::bail!("invalid doc id length {}", s.len());
        }
        let mut buf = [0; 16];
        hex_decode(s, &mut buf)?;
        Ok(Self(buf))
    }
}

/// Opaque per-writer identifier. Every change carries the actor that authored it;
/// sequence numbers are strictly increasing and contiguous within one actor.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ActorId([u8; 16]);

impl ActorId {
    pub fn new(id: [u8; 16]) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        let mut buf = [0; 16];
        getrandom::getrandom(&mut buf).expect("failed to access system RNG");
        Self(buf)
    }
}

impl AsRef<[u8; 16]> for ActorId {
    fn as_ref(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ActorId({})", self)
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for ActorId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 {
            anyhow::bail!("invalid actor id length {}", s.len());
        }
        let mut buf = [0; 16];
        hex_decode(s, &mut buf)?;
        Ok(Self(buf))
    }
}

fn hex_decode(s: &str, out: &mut [u8]) -> anyhow::Result<()> {
    let bytes = s.as_bytes();
    for (i, slot) in out.iter_mut().enumerate() {
        let hi = hex_nibble(bytes[i * 2])?;
        let lo = hex_nibble(bytes[i * 2 + 1])?;
        *slot = (hi << 4) | lo;
    }
    Ok(())
}

fn hex_nibble(b: u8) -> anyhow::Result<u8> {
    match b {
        b'0'..=b'9' => Ok(b - b'0'),
        b'a'..=b'f' => Ok(b - b'a' + 10),
        b'A'..=b'F' => Ok(b - b'A' + 10),
        _ => anyhow::bail!("invalid hex digit"),
    }
}

/// The identity of a single operation: `(counter, actor)`.
///
/// `Ord` is derived with `counter` declared first, so the natural order of
/// `OpId` values *is* Lamport order: counter dominates, actor id breaks ties.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Debug)]
pub struct OpId {
    pub counter: u64,
    pub actor: ActorId,
}

impl OpId {
    pub fn new(counter: u64, actor: ActorId) -> Self {
        Self { counter, actor }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.actor)
    }
}

/// The stable identity of a list/text position.
///
/// `Head` denotes "the start of the sequence" and is used as the `after`
/// reference for an insertion at index 0. Every other position is identified
/// by the op-id of the `ins` operation that created it, which never changes
/// even as the position's contents are overwritten.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Debug)]
pub enum ElemId {
    Head,
    Op(OpId),
}

impl ElemId {
    pub fn op_id(self) -> Option<OpId> {
        match self {
            ElemId::Head => None,
            ElemId::Op(id) => Some(id),
        }
    }
}

impl fmt::Display for ElemId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElemId::Head => write!(f, "_head"),
            ElemId::Op(id) => write!(f, "{}", id),
        }
    }
}

/// Content hash of a change's canonical encoding.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct ChangeHash(pub [u8; 32]);

impl ChangeHash {
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ChangeHash({})", self)
    }
}

impl fmt::Display for ChangeHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// The identity of a composite object (a map, list or text). The document
/// root is the one composite with no creating operation.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Debug)]
pub enum ObjId {
    Root,
    Op(OpId),
}

impl ObjId {
    pub fn op_id(self) -> Option<OpId> {
        match self {
            ObjId::Root => None,
            ObjId::Op(id) => Some(id),
        }
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjId::Root => write!(f, "_root"),
            ObjId::Op(id) => write!(f, "{}", id),
        }
    }
}

impl From<ElemId> for ObjId {
    fn from(e: ElemId) -> Self {
        match e {
            ElemId::Head => ObjId::Root,
            ElemId::Op(id) => ObjId::Op(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opid_lamport_order() {
        let a = ActorId::new([1; 16]);
        let b = ActorId::new([2; 16]);
        assert!(OpId::new(1, b) > OpId::new(1, a));
        assert!(OpId::new(2, a) > OpId::new(1, b));
    }

    #[test]
    fn doc_id_roundtrips_through_display() {
        let id = DocId::random();
        let s = id.to_string();
        assert_eq!(id, s.parse().unwrap());
    }
}
