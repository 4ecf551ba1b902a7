//! # weft
//!
//! An operation-based CRDT engine for collaborative JSON-like documents,
//! in the style of Automerge: maps, lists and text, merged deterministically
//! from a causally-ordered log of changes rather than by exchanging the
//! materialised value itself.
//!
//! ## Model
//! A [`Document`] owns an [`OpLog`] of [`Change`]s. Each change carries one
//! actor's [`Op`]s, a Lamport `start_op` counter and the hashes of the
//! changes it causally depends on. Ops never overwrite each other in place:
//! every write lands in a conflict set keyed by [`OpId`], and concurrent
//! writes to the same key are resolved by taking the Lamport-maximal entry
//! (highest `(counter, actor)` pair) as the winner. This makes merge order
//! irrelevant — applying the same set of changes in any dependency-respecting
//! order reaches the same [`Materializer`] tree.
//!
//! ## Identity
//! [`ActorId`] names a writer, [`OpId`] names a single operation (and orders
//! operations via its derived `Ord`, counter first), [`ElemId`] names a
//! position in a list or text sequence, and [`ObjId`] names a composite
//! object (a map, list or text body) by the op that created it.
//!
//! ## Editing
//! Mutations go through [`Document::transact`], which opens a
//! [`Transaction`], applies each op to the tree as it is synthesised (so
//! reads inside the same transaction see prior writes), and on success
//! bundles the recorded ops into a [`Change`] recorded in the log. An error
//! returned from the closure rolls the tree back to its pre-transaction
//! state instead.
//!
//! ## Replication
//! Two documents converge by exchanging [`Change`]s directly
//! ([`Document::apply_change`]/[`Document::merge`]) or through the
//! [`sync`] module's Bloom-filter-assisted protocol, which avoids resending
//! changes a peer probably already has without needing a full digest
//! exchange up front.
//!
//! ## Persistence
//! [`Document::save`]/[`Document::load`] serialise the whole op log to a
//! single column-oriented, optionally DEFLATE-compressed blob. The
//! [`storage`] module specifies (but does not implement) the key-value
//! contract an embedder's persistence layer should satisfy to store
//! snapshots and incremental changes separately.

mod change;
mod document;
mod encoding;
mod error;
mod id;
mod materializer;
mod object;
mod op;
mod oplog;
mod patch;
#[cfg(test)]
mod props;
pub mod storage;
pub mod sync;
mod text;
mod transaction;
mod value;

pub use change::Change;
pub use document::{DocValue, Document};
pub use error::DocError;
pub use id::{ActorId, ChangeHash, DocId, ElemId, ObjId, OpId};
pub use materializer::Materializer;
pub use object::{ConflictSet, ListObject, MapObject, Object, ResolvedMark, Value};
pub use op::{Key, Op, OpType};
pub use oplog::OpLog;
pub use patch::Patch;
pub use sync::{SyncMessage, SyncState};
pub use transaction::Transaction;
pub use value::{Expand, MarkData, ObjType, ScalarKind, ScalarValue};
