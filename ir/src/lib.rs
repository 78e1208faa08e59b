//! The recorded computation graph: opcodes, nodes, the constant pool, graph
//! construction and validation, and the JSON wire format.
//!
//! This crate has no notion of optimization or code generation; it is the
//! shared data model that `forge-optimizer` and `forge-backend` both
//! operate on.

pub mod constant_pool;
pub mod error;
pub mod graph;
pub mod node;
pub mod opcode;
pub mod serialization;

pub use constant_pool::ConstantPool;
pub use error::{GraphError, Result};
pub use graph::Graph;
pub use node::{Node, NodeFlags, NodeId};
pub use opcode::OpCode;
