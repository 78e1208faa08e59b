use thiserror::Error;

use crate::node::NodeId;

/// Errors raised while building or validating a [`crate::Graph`].
///
/// These are all "malformed IR" conditions in `spec.md` §7's taxonomy:
/// programmer/producer bugs that fail fast at construction or validation
/// time, never at kernel-execution time.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node {consumer} references operand {operand} which has not been defined yet")]
    OperandNotYetDefined { consumer: NodeId, operand: NodeId },

    #[error("node {node} references out-of-range operand {operand} (graph has {len} nodes)")]
    OperandOutOfRange {
        node: NodeId,
        operand: NodeId,
        len: usize,
    },

    #[error("node {node} has opcode {op:?} which expects {expected} operand(s), got {got}")]
    ArityMismatch {
        node: NodeId,
        op: crate::opcode::OpCode,
        expected: usize,
        got: usize,
    },

    #[error("constant node {node} references pool index {index} out of range (pool has {len} entries)")]
    ConstantPoolIndexOutOfRange {
        node: NodeId,
        index: u32,
        len: usize,
    },

    #[error("graph contains a cycle reachable from node {node}")]
    CycleDetected { node: NodeId },

    #[error("output id {0} is out of range")]
    OutputOutOfRange(NodeId),

    #[error("diff_input id {0} is out of range")]
    DiffInputOutOfRange(NodeId),

    #[error("malformed JSON graph: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("constant pool entry {index} is neither a JSON number nor one of \"NaN\"/\"Infinity\"/\"-Infinity\"")]
    InvalidConstantPoolEntry { index: usize },
}

pub type Result<T> = std::result::Result<T, GraphError>;
