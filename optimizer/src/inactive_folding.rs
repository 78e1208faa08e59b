//! Inactive folding (`spec.md` §4.2.2): any node whose value does not
//! depend on an `Input` — including a bare `Constant` leaf, which trivially
//! folds to itself — is evaluated at compile time and replaced by a fresh
//! `Constant`. Nodes are processed in increasing ID order, so by the
//! topological-order invariant every operand of an inactive node has
//! already been folded (and cached in `folded`) by the time its consumer is
//! reached; this mirrors `evaluateConstantSubgraph`'s recursion in the
//! original implementation without repeating the recursive walk.

use forge_ir::{Graph, Node, NodeId, OpCode};
use tracing::debug;

use crate::eval::eval;
use crate::PassStats;

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
    // Folded value cache, keyed by old id, so an inactive node reached by
    // multiple consumers is evaluated once.
    let mut folded: Vec<Option<f64>> = vec![None; graph.len()];
    let mut rewrites = 0usize;

    for old_id in 0..graph.len() {
        let old_id = NodeId(old_id as u32);
        let node = *graph.node(old_id);

        if !node.is_active() {
            if let Some(value) = fold_value(graph, old_id, &folded) {
                folded[old_id.index()] = Some(value);
                let const_id = result.create_constant(value);
                old_to_new[old_id.index()] = const_id;
                rewrites += 1;
                debug!(node = ?old_id, value, "inactive_folding: collapsed to constant");
                continue;
            }
        }

        let new_node = Node {
            op: node.op,
            a: remap(&old_to_new, node.a),
            b: remap(&old_to_new, node.b),
            c: remap(&old_to_new, node.c),
            imm: node.imm,
            flags: node.flags,
        };
        let new_id = result.add_node(new_node);
        old_to_new[old_id.index()] = new_id;
    }

    for &old_out in &graph.outputs {
        result.mark_output(old_to_new[old_out.index()]);
    }
    for &old_di in &graph.diff_inputs {
        result.mark_diff_input(old_to_new[old_di.index()]);
    }

    (result, PassStats { rewrites })
}

/// Evaluate `id`'s value given already-folded operand values, using the
/// compile-time numeric rules in `spec.md` §4.4.3. Already-`Constant` nodes
/// read straight from the pool; nodes already folded this pass are read
/// from `folded`; anything else is an inactive node not yet visited because
/// the recursion reaches it lower in node-ID order, which holds by the
/// topological-order invariant.
fn fold_value(graph: &Graph, id: NodeId, folded: &[Option<f64>]) -> Option<f64> {
    let node = graph.node(id);
    if node.op == OpCode::Constant {
        return graph.const_pool.get(node.imm);
    }
    let operand_value = |operand: NodeId| -> Option<f64> {
        if operand.is_none() {
            return Some(0.0);
        }
        if let Some(v) = folded[operand.index()] {
            return Some(v);
        }
        let operand_node = graph.node(operand);
        if operand_node.op == OpCode::Constant {
            return graph.const_pool.get(operand_node.imm);
        }
        None
    };

    let a = operand_value(node.a)?;
    let b = operand_value(node.b)?;
    let c = operand_value(node.c)?;
    eval(node.op, a, b, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_purely_constant_subgraph() {
        let mut g = Graph::new();
        let two = g.create_constant(2.0);
        let three = g.create_constant(3.0);
        let sum = g.create_binary(OpCode::Add, two, three).unwrap();
        g.mark_output(sum);

        let (out, stats) = apply(&g);
        // All three nodes are inactive: "two" and "three" each fold to
        // themselves (now orphaned), and "sum" folds to a fresh 5.0.
        assert_eq!(stats.rewrites, 3);
        let out_node = out.node(out.outputs[0]);
        assert_eq!(out_node.op, OpCode::Constant);
        assert_eq!(out.const_pool.get(out_node.imm), Some(5.0));
    }

    #[test]
    fn leaves_active_subgraph_alone_but_still_folds_its_constant_leaf() {
        let mut g = Graph::new();
        let x = g.create_input();
        let two = g.create_constant(2.0);
        let y = g.create_binary(OpCode::Mul, x, two).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        // "two" is inactive and folds (to itself); x and y are active and
        // are copied through unchanged.
        assert_eq!(stats.rewrites, 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out.node(out.outputs[0]).op, OpCode::Mul);
    }

    #[test]
    fn folds_division_by_zero_to_zero() {
        let mut g = Graph::new();
        let five = g.create_constant(5.0);
        let zero = g.create_constant(0.0);
        let out = g.create_binary(OpCode::Div, five, zero).unwrap();
        g.mark_output(out);

        let (result, _) = apply(&g);
        let out_node = result.node(result.outputs[0]);
        assert_eq!(result.const_pool.get(out_node.imm), Some(0.0));
    }
}
