//! Common subexpression elimination (`spec.md` §4.2.3): single-pass, O(n),
//! keyed on a structural signature. `Input` nodes are never coalesced (two
//! distinct inputs are never "the same value" even if a future caller always
//! writes the same number into both); `Constant` operands are normalized by
//! the bit pattern of their *value* rather than by node id, so two constants
//! with the same double collide regardless of where they were interned.
//!
//! Grounded in
//! `original_source/src/graph/optimizations/common_subexpression_elimination.cpp`:
//! same `oldId -> newId` map, same per-node signature shape, same "dead nodes
//! pass through unchanged but still get a slot" handling.

use forge_ir::{Graph, Node, NodeId, OpCode};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::PassStats;

/// A CSE signature: the normalized operand triple plus the opcode (and, for
/// `Constant`, the pool index — already unique per value since `ConstantPool`
/// dedups by bit pattern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Signature {
    op: OpCode,
    a: OperandKey,
    b: OperandKey,
    c: OperandKey,
    imm: u32,
}

/// Either a remapped node id, or the bit pattern of a constant's value —
/// keeping these in distinct variants means a constant never accidentally
/// collides with a node id that happens to equal its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OperandKey {
    None,
    Node(NodeId),
    ConstValue(u64),
}

fn normalize(graph: &Graph, old_to_new: &[NodeId], id: NodeId) -> OperandKey {
    if id.is_none() {
        return OperandKey::None;
    }
    let node = graph.node(id);
    if node.op == OpCode::Constant {
        if let Some(v) = graph.const_pool.get(node.imm) {
            return OperandKey::ConstValue(v.to_bits());
        }
    }
    OperandKey::Node(old_to_new[id.index()])
}

fn remap(old_to_new: &[NodeId], id: NodeId) -> NodeId {
    if id.is_none() {
        NodeId::NONE
    } else {
        old_to_new[id.index()]
    }
}

pub fn apply(graph: &Graph) -> (Graph, PassStats) {
    let mut result = Graph {
        const_pool: graph.const_pool.clone(),
        ..Graph::new()
    };
    let mut old_to_new = vec![NodeId::NONE; graph.len()];
    let mut seen: FxHashMap<Signature, NodeId> = FxHashMap::default();
    let mut rewrites = 0usize;

    for old_id in 0..graph.len() {
        let old_id = NodeId(old_id as u32);
        let node = *graph.node(old_id);

        let new_node = Node {
            op: node.op,
            a: remap(&old_to_new, node.a),
            b: remap(&old_to_new, node.b),
            c: remap(&old_to_new, node.c),
            imm: node.imm,
            flags: node.flags,
        };

        if node.is_dead() || node.op == OpCode::Input {
            let new_id = result.add_node(new_node);
            old_to_new[old_id.index()] = new_id;
            continue;
        }

        let sig = Signature {
            op: node.op,
            a: normalize(graph, &old_to_new, node.a),
            b: normalize(graph, &old_to_new, node.b),
            c: normalize(graph, &old_to_new, node.c),
            imm: if node.op == OpCode::Constant { node.imm } else { 0 },
        };

        if let Some(&canonical) = seen.get(&sig) {
            old_to_new[old_id.index()] = canonical;
            rewrites += 1;
            debug!(node = ?old_id, canonical = ?canonical, "cse: redirected duplicate");
            continue;
        }

        let new_id = result.add_node(new_node);
        old_to_new[old_id.index()] = new_id;
        seen.insert(sig, new_id);
    }

    for &old_out in &graph.outputs {
        result.mark_output(old_to_new[old_out.index()]);
    }
    for &old_di in &graph.diff_inputs {
        result.mark_diff_input(old_to_new[old_di.index()]);
    }

    (result, PassStats { rewrites })
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_ir::OpCode;

    #[test]
    fn coalesces_identical_additions() {
        let mut g = Graph::new();
        let x = g.create_input();
        let one = g.create_constant(1.0);
        let a = g.create_binary(OpCode::Add, x, one).unwrap();
        let b = g.create_binary(OpCode::Add, x, one).unwrap();
        let y = g.create_binary(OpCode::Mul, a, b).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        let adds = out
            .nodes
            .iter()
            .filter(|n| n.op == OpCode::Add)
            .count();
        assert_eq!(adds, 1);
    }

    #[test]
    fn never_coalesces_distinct_inputs() {
        let mut g = Graph::new();
        let x = g.create_input();
        let y = g.create_input();
        let sum = g.create_binary(OpCode::Add, x, y).unwrap();
        g.mark_output(sum);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 0);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn coalesces_constants_with_same_value_regardless_of_id() {
        let mut g = Graph::new();
        let x = g.create_input();
        let two_a = g.create_constant(2.0);
        let a = g.create_binary(OpCode::Mul, x, two_a).unwrap();
        // A second constant node referencing the same pool entry (interning
        // already collapses this at the pool level, but CSE must also be
        // robust if a future recorder ever emits two distinct `Constant`
        // nodes with the same `imm`).
        let two_b = g.create_constant(2.0);
        let b = g.create_binary(OpCode::Mul, x, two_b).unwrap();
        let y = g.create_binary(OpCode::Add, a, b).unwrap();
        g.mark_output(y);

        assert_eq!(two_a, two_b);
        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        let muls = out.nodes.iter().filter(|n| n.op == OpCode::Mul).count();
        assert_eq!(muls, 1);
    }
}
