use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::instrument;

use crate::constant_pool::ConstantPool;
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeFlags, NodeId};
use crate::opcode::OpCode;

/// A recorded computation graph: a topologically-ordered sequence of
/// [`Node`]s, a deduplicated constant pool, and the sets of output and
/// differentiation-input node IDs.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub const_pool: ConstantPool,
    pub outputs: Vec<NodeId>,
    pub diff_inputs: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    fn operand_flags(&self, ids: &[NodeId]) -> (bool, bool) {
        let mut active = false;
        let mut needs_gradient = false;
        for &id in ids {
            if id.is_none() {
                continue;
            }
            let n = self.node(id);
            active |= n.is_active();
            needs_gradient |= n.needs_gradient();
        }
        (active, needs_gradient)
    }

    /// Append a fully-formed node and return its ID. Low-level escape hatch
    /// used by the optimizer passes, which already know the flags they want
    /// (inherited or OR'd from specific operands rather than all of them).
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = self.next_id();
        self.nodes.push(node);
        id
    }

    /// Create an `Input` node (a free variable the caller writes before
    /// invoking the kernel).
    pub fn create_input(&mut self) -> NodeId {
        let id = self.next_id();
        self.nodes.push(Node {
            op: OpCode::Input,
            a: NodeId::NONE,
            b: NodeId::NONE,
            c: NodeId::NONE,
            imm: 0,
            flags: NodeFlags::ACTIVE,
        });
        id
    }

    /// Create (or reuse, if an identical value already exists in the pool)
    /// a `Constant` node for `value`.
    pub fn create_constant(&mut self, value: f64) -> NodeId {
        let imm = self.const_pool.intern(value);
        let id = self.next_id();
        self.nodes.push(Node {
            op: OpCode::Constant,
            a: NodeId::NONE,
            b: NodeId::NONE,
            c: NodeId::NONE,
            imm,
            flags: NodeFlags::empty(),
        });
        id
    }

    /// Create a unary-operation node.
    pub fn create_unary(&mut self, op: OpCode, a: NodeId) -> Result<NodeId> {
        self.check_defined(a)?;
        self.check_arity(op, 1)?;
        let (active, needs_gradient) = self.operand_flags(&[a]);
        Ok(self.push_op(op, a, NodeId::NONE, NodeId::NONE, active, needs_gradient))
    }

    /// Create a binary-operation node.
    pub fn create_binary(&mut self, op: OpCode, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.check_defined(a)?;
        self.check_defined(b)?;
        self.check_arity(op, 2)?;
        let (active, needs_gradient) = self.operand_flags(&[a, b]);
        Ok(self.push_op(op, a, b, NodeId::NONE, active, needs_gradient))
    }

    /// Create a ternary-operation node (currently only `If`).
    pub fn create_ternary(&mut self, op: OpCode, a: NodeId, b: NodeId, c: NodeId) -> Result<NodeId> {
        self.check_defined(a)?;
        self.check_defined(b)?;
        self.check_defined(c)?;
        self.check_arity(op, 3)?;
        let (active, needs_gradient) = self.operand_flags(&[a, b, c]);
        Ok(self.push_op(op, a, b, c, active, needs_gradient))
    }

    fn push_op(
        &mut self,
        op: OpCode,
        a: NodeId,
        b: NodeId,
        c: NodeId,
        active: bool,
        needs_gradient: bool,
    ) -> NodeId {
        let id = self.next_id();
        let mut flags = NodeFlags::empty();
        flags.set(NodeFlags::ACTIVE, active);
        flags.set(NodeFlags::NEEDS_GRADIENT, needs_gradient);
        self.nodes.push(Node {
            op,
            a,
            b,
            c,
            imm: 0,
            flags,
        });
        id
    }

    fn check_defined(&self, id: NodeId) -> Result<()> {
        if id.index() >= self.nodes.len() {
            return Err(GraphError::OperandNotYetDefined {
                consumer: self.next_id(),
                operand: id,
            });
        }
        Ok(())
    }

    fn check_arity(&self, op: OpCode, got: usize) -> Result<()> {
        let expected = op.arity();
        if expected != got {
            return Err(GraphError::ArityMismatch {
                node: self.next_id(),
                op,
                expected,
                got,
            });
        }
        Ok(())
    }

    /// Mark `id` as a graph output.
    pub fn mark_output(&mut self, id: NodeId) {
        self.outputs.push(id);
    }

    /// Mark `id` as a differentiation input: its gradient will be computed
    /// by the reverse pass. Setting `NEEDS_GRADIENT` on the node itself
    /// (rather than only recording `id` in `diff_inputs`) is what makes the
    /// flag propagate forward: every later node built from `id` via
    /// `create_unary`/`create_binary`/`create_ternary` ORs its operands'
    /// `needsGradient` flags in, exactly like `isActive` (`spec.md` §4.1).
    /// Must be called before any node that uses `id` as an operand is
    /// constructed, same ordering constraint the recorder already has for
    /// `isActive`.
    pub fn mark_diff_input(&mut self, id: NodeId) {
        self.diff_inputs.push(id);
        self.node_mut(id).set_needs_gradient(true);
    }

    /// Validate every invariant in `spec.md` §3: topological order, operand
    /// sanity, constant-pool bounds, no cycles, output/diff-input ranges.
    #[instrument(skip(self))]
    pub fn validate(&self) -> Result<()> {
        let mut graph = DiGraphMap::<u32, ()>::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            graph.add_node(id.0);

            if node.op == OpCode::Constant {
                if self.const_pool.get(node.imm).is_none() {
                    return Err(GraphError::ConstantPoolIndexOutOfRange {
                        node: id,
                        index: node.imm,
                        len: self.const_pool.len(),
                    });
                }
            }

            let operand_count = [node.a, node.b, node.c]
                .iter()
                .take(node.op.arity())
                .filter(|o| !o.is_none())
                .count();
            if operand_count != node.op.arity() {
                return Err(GraphError::ArityMismatch {
                    node: id,
                    op: node.op,
                    expected: node.op.arity(),
                    got: operand_count,
                });
            }

            for operand in [node.a, node.b, node.c].into_iter().take(node.op.arity()) {
                if operand.index() >= self.nodes.len() {
                    return Err(GraphError::OperandOutOfRange {
                        node: id,
                        operand,
                        len: self.nodes.len(),
                    });
                }
                if operand.0 >= id.0 {
                    return Err(GraphError::OperandNotYetDefined {
                        consumer: id,
                        operand,
                    });
                }
                graph.add_edge(operand.0, id.0, ());
            }
        }

        if toposort(&graph, None).is_err() {
            return Err(GraphError::CycleDetected {
                node: NodeId(self.nodes.len() as u32),
            });
        }

        for &out in &self.outputs {
            if out.index() >= self.nodes.len() {
                return Err(GraphError::OutputOutOfRange(out));
            }
        }
        for &di in &self.diff_inputs {
            if di.index() >= self.nodes.len() {
                return Err(GraphError::DiffInputOutOfRange(di));
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            let id = NodeId(i as u32);
            match node.op {
                OpCode::Input => writeln!(f, "{id} = Input")?,
                OpCode::Constant => {
                    let v = self.const_pool.get(node.imm).unwrap_or(f64::NAN);
                    writeln!(f, "{id} = Constant({v})")?
                }
                op => {
                    let ops: Vec<String> = [node.a, node.b, node.c]
                        .into_iter()
                        .take(op.arity())
                        .map(|o| o.to_string())
                        .collect();
                    writeln!(f, "{id} = {op:?}({})", ops.join(", "))?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_quadratic() {
        let mut g = Graph::new();
        let x = g.create_input();
        let x2 = g.create_binary(OpCode::Mul, x, x).unwrap();
        let two = g.create_constant(2.0);
        let two_x = g.create_binary(OpCode::Mul, x, two).unwrap();
        let y = g.create_binary(OpCode::Add, x2, two_x).unwrap();
        g.mark_output(y);
        g.mark_diff_input(x);

        assert!(g.validate().is_ok());
        assert!(g.node(y).is_active());
        assert!(g.node(x2).is_active());
        assert!(!g.node(two).is_active());
    }

    #[test]
    fn rejects_forward_reference() {
        let mut g = Graph::new();
        let bogus = NodeId(5);
        let err = g.create_unary(OpCode::Neg, bogus).unwrap_err();
        assert!(matches!(err, GraphError::OperandNotYetDefined { .. }));
    }

    #[test]
    fn rejects_arity_mismatch() {
        let mut g = Graph::new();
        let x = g.create_input();
        let err = g.create_ternary(OpCode::Add, x, x, x).unwrap_err();
        assert!(matches!(err, GraphError::ArityMismatch { .. }));
    }
}
