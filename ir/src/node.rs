use serde::{Deserialize, Serialize};
use std::fmt;

use crate::opcode::OpCode;

/// Dense, non-negative index of a [`Node`] within a [`crate::Graph`]. Also
/// used directly as the slot index into value/gradient buffers — see
/// `spec.md` §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Sentinel for an absent operand, matching the wire format's
    /// `0xFFFFFFFF`.
    pub const NONE: NodeId = NodeId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(v: u32) -> Self {
        NodeId(v)
    }
}

bitflags::bitflags! {
    /// Boolean properties computed at construction or by the optimizer.
    ///
    /// `spec.md` §3 specifies these as independent booleans; they are
    /// packed into one field here purely to keep [`Node`] small, matching
    /// how dense flag fields are stored elsewhere in the corpus.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct NodeFlags: u8 {
        /// Depends transitively on at least one `Input` node.
        const ACTIVE         = 0b0000_0001;
        /// Unreachable from any output; only ever set by the optimizer's
        /// dead-code computation, never at construction.
        const DEAD           = 0b0000_0010;
        /// Transitively required by reverse-mode differentiation of some
        /// gradient-marked output.
        const NEEDS_GRADIENT = 0b0000_0100;
    }
}

impl Default for NodeFlags {
    fn default() -> Self {
        NodeFlags::empty()
    }
}

/// One operation in the recorded computation graph.
///
/// `a`, `b`, `c` are operand [`NodeId`]s (unused slots carry
/// [`NodeId::NONE`]); `imm` is the constant-pool index for `OpCode::Constant`
/// nodes and is otherwise unused.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub op: OpCode,
    pub a: NodeId,
    pub b: NodeId,
    pub c: NodeId,
    pub imm: u32,
    pub flags: NodeFlags,
}

impl Node {
    pub fn is_active(&self) -> bool {
        self.flags.contains(NodeFlags::ACTIVE)
    }

    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    pub fn needs_gradient(&self) -> bool {
        self.flags.contains(NodeFlags::NEEDS_GRADIENT)
    }

    pub fn set_active(&mut self, value: bool) {
        self.flags.set(NodeFlags::ACTIVE, value);
    }

    pub fn set_dead(&mut self, value: bool) {
        self.flags.set(NodeFlags::DEAD, value);
    }

    pub fn set_needs_gradient(&mut self, value: bool) {
        self.flags.set(NodeFlags::NEEDS_GRADIENT, value);
    }

    /// Operand slots in declaration order, skipping [`NodeId::NONE`].
    pub fn operands(&self) -> impl Iterator<Item = NodeId> {
        [self.a, self.b, self.c]
            .into_iter()
            .take(self.op.arity())
            .filter(|id| !id.is_none())
    }
}
