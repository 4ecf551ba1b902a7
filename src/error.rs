//! The error taxonomy. This crate's internal plumbing uses `anyhow` at
//! boundaries that merely propagate failure, but the document engine's own
//! failure set is a stable, matchable public contract callers need to branch
//! on, so it gets a dedicated `thiserror` enum instead.

use thiserror::Error;

/// Errors raised by the document engine.
#[derive(Debug, Error)]
pub enum DocError {
    /// Malformed bytes entering the engine (change, save file or sync message).
    #[error("malformed encoding")]
    DecodeError,

    /// A change's `seq` skips ahead of the actor's last known sequence number.
    #[error("out of order change for actor {actor}: expected seq {expected}, got {got}")]
    OutOfOrder {
        actor: crate::id::ActorId,
        expected: u64,
        got: u64,
    },

    /// A change referenced deps not yet present locally (strict-mode callers only).
    #[error("missing {0} dependencies")]
    MissingDeps(usize),

    /// A patch referenced an object id with no corresponding composite.
    #[error("patch referred to unknown object {0}")]
    CorruptPatch(String),

    /// A composite object was claimed by two different parent slots.
    #[error("object {0} has more than one parent")]
    MultipleParents(String),

    /// Re-entered a transaction already in progress on the same document.
    #[error("a transaction is already open on this document")]
    NestedTransaction,

    /// Caller-supplied argument violates a documented precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced object, key or index does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, DocError>;
