//! The patch: the declarative record of a change's effect (§4.4).
//!
//! A patch is the sequence of resolved `(opId, Op)` pairs a change expands
//! to. Each entry already carries its target `obj`/`key` path, which gives
//! the same addressing a tree-structured `{props, edits}` shape would, in a
//! flatter representation. [`Patch::apply`] is the single entry point both
//! the op log (applying a freshly decoded remote change) and the local edit
//! context (applying its own synthesised ops immediately) call into, so a
//! local write and a remote merge go through identical code.

use crate::error::DocError;
use crate::id::OpId;
use crate::materializer::Materializer;
use crate::op::Op;

#[derive(Clone, Debug, Default)]
pub struct Patch {
    pub entries: Vec<(OpId, Op)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: OpId, op: Op) {
        self.entries.push((id, op));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: Patch) {
        self.entries.extend(other.entries);
    }

    pub fn apply(&self, tree: &mut Materializer) -> Result<(), DocError> {
        for (id, op) in &self.entries {
            tree.apply_op(*id, op)?;
        }
        Ok(())
    }
}
