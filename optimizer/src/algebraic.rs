//! Algebraic simplification (`spec.md` §4.2.4): per-node pattern rewrites
//! recognized by operand *identity* (`node.a == node.b`) and by
//! `Constant`-value checks, not by evaluating the node itself.
//!
//! Grounded in
//! `original_source/src/graph/optimizations/algebraic_simplification.cpp`'s
//! rewrite table. That implementation "threads through" an identity rewrite
//! by copying the kept operand's `Node` struct wholesale into the current
//! slot; this crate instead redirects the old id to the kept operand's
//! *already-remapped* new id (the same technique `stability.rs` uses for
//! `log(exp(x)) -> x`), which satisfies the safety note in `spec.md` §4.2.4
//! without ever needing to re-derive a struct copy's operand remapping.

use forge_ir::{Graph, Node, NodeId, OpCode};
use tracing::debug;

use crate::PassStats;

const CONST_EPS: f64 = 1e-15;

fn const_value(graph: &Graph, old_to_new: &[NodeId], id: NodeId) -> Option<f64> {
    if id.is_none() || id.index() >= graph.len() {
        return None;
    }
    let node = graph.node(id);
    if node.op != OpCode::Constant {
        return None;
    }
    let _ = old_to_new; // constants never get redirected away
    graph.const_pool.get(node.imm)
}

fn is_constant_value(graph: &Graph, old_to_new: &[NodeId], id: NodeId, expected: f64) -> bool {
    matches!(const_value(graph, old_to_new, id), Some(v) if (v - expected).abs() < CONST_EPS)
}

fn op_of(graph: &Graph, id: NodeId) -> Option<OpCode> {
    if id.is_none() || id.index() >= graph.len() {
        return None;
    }
    Some(graph.node(id).op)
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
    let mut rewrites = 0usize;

    for old_id in 0..graph.len() {
        let old_id = NodeId(old_id as u32);
        let node = *graph.node(old_id);

        if node.is_dead() {
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
            continue;
        }

        // "fold to zero" / "fold to one": redirect straight to a fresh
        // constant, no node emitted for `old_id` at all.
        let mut closed_form: Option<f64> = None;
        // "thread through": redirect to an operand's already-remapped id.
        let mut thread_through: Option<NodeId> = None;

        match node.op {
            OpCode::Mul => {
                if node.a == node.b {
                    // x * x -> Square(x)
                    let new_node = Node {
                        op: OpCode::Square,
                        a: remap(&old_to_new, node.a),
                        b: NodeId::NONE,
                        c: NodeId::NONE,
                        imm: 0,
                        flags: node.flags,
                    };
                    let new_id = result.add_node(new_node);
                    old_to_new[old_id.index()] = new_id;
                    rewrites += 1;
                    debug!(node = ?old_id, "algebraic: mul(x,x) -> square(x)");
                    continue;
                } else if is_constant_value(graph, &old_to_new, node.b, 1.0) {
                    thread_through = Some(node.a);
                } else if is_constant_value(graph, &old_to_new, node.a, 1.0) {
                    thread_through = Some(node.b);
                } else if is_constant_value(graph, &old_to_new, node.a, 0.0)
                    || is_constant_value(graph, &old_to_new, node.b, 0.0)
                {
                    closed_form = Some(0.0);
                }
            }
            OpCode::Add => {
                if is_constant_value(graph, &old_to_new, node.a, 0.0) {
                    thread_through = Some(node.b);
                } else if is_constant_value(graph, &old_to_new, node.b, 0.0) {
                    thread_through = Some(node.a);
                }
            }
            OpCode::Sub => {
                if node.a == node.b {
                    closed_form = Some(0.0);
                } else if is_constant_value(graph, &old_to_new, node.b, 0.0) {
                    thread_through = Some(node.a);
                }
            }
            OpCode::Div => {
                if node.a == node.b {
                    closed_form = Some(1.0);
                } else if is_constant_value(graph, &old_to_new, node.b, 1.0) {
                    thread_through = Some(node.a);
                }
            }
            OpCode::Neg => {
                if op_of(graph, node.a) == Some(OpCode::Neg) {
                    let inner = graph.node(node.a).a;
                    thread_through = Some(inner);
                }
            }
            OpCode::Square => {
                if is_constant_value(graph, &old_to_new, node.a, 0.0) {
                    closed_form = Some(0.0);
                } else if is_constant_value(graph, &old_to_new, node.a, 1.0) {
                    closed_form = Some(1.0);
                }
            }
            OpCode::Sqrt => {
                if is_constant_value(graph, &old_to_new, node.a, 0.0) {
                    closed_form = Some(0.0);
                } else if is_constant_value(graph, &old_to_new, node.a, 1.0) {
                    closed_form = Some(1.0);
                }
            }
            OpCode::Exp => {
                if is_constant_value(graph, &old_to_new, node.a, 0.0) {
                    closed_form = Some(1.0);
                }
            }
            OpCode::Log => {
                if is_constant_value(graph, &old_to_new, node.a, 1.0) {
                    closed_form = Some(0.0);
                }
            }
            _ => {}
        }

        if let Some(value) = closed_form {
            let const_id = result.create_constant(value);
            old_to_new[old_id.index()] = const_id;
            rewrites += 1;
            debug!(node = ?old_id, value, "algebraic: folded to closed form");
            continue;
        }

        if let Some(kept) = thread_through {
            // Safety note (spec.md §4.2.4): never structurally delete a node
            // — redirecting to the kept operand's new id is exactly that,
            // whether or not the kept operand is itself an `Input`; the
            // `Input` node stays present in `result`, only this node's id
            // stops having its own slot.
            old_to_new[old_id.index()] = remap(&old_to_new, kept);
            rewrites += 1;
            debug!(node = ?old_id, "algebraic: threaded through identity operand");
            continue;
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
        let new_out = old_to_new[old_out.index()];
        if !new_out.is_none() {
            result.mark_output(new_out);
        }
    }
    for &old_di in &graph.diff_inputs {
        let new_di = old_to_new[old_di.index()];
        if !new_di.is_none() {
            result.mark_diff_input(new_di);
        }
    }

    (result, PassStats { rewrites })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_self_becomes_square() {
        let mut g = Graph::new();
        let x = g.create_input();
        let y = g.create_binary(OpCode::Mul, x, x).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        assert_eq!(out.node(out.outputs[0]).op, OpCode::Square);
    }

    #[test]
    fn mul_by_one_threads_through() {
        let mut g = Graph::new();
        let x = g.create_input();
        let one = g.create_constant(1.0);
        let y = g.create_binary(OpCode::Mul, x, one).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        assert_eq!(out.node(out.outputs[0]).op, OpCode::Input);
    }

    #[test]
    fn mul_by_zero_folds() {
        let mut g = Graph::new();
        let x = g.create_input();
        let zero = g.create_constant(0.0);
        let y = g.create_binary(OpCode::Mul, x, zero).unwrap();
        g.mark_output(y);

        let (out, _) = apply(&g);
        let out_node = out.node(out.outputs[0]);
        assert_eq!(out_node.op, OpCode::Constant);
        assert_eq!(out.const_pool.get(out_node.imm), Some(0.0));
    }

    #[test]
    fn add_zero_threads_through_either_side() {
        let mut g = Graph::new();
        let x = g.create_input();
        let zero = g.create_constant(0.0);
        let y = g.create_binary(OpCode::Add, zero, x).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        assert_eq!(out.node(out.outputs[0]).op, OpCode::Input);
    }

    #[test]
    fn sub_self_folds_to_zero() {
        let mut g = Graph::new();
        let x = g.create_input();
        let y = g.create_binary(OpCode::Sub, x, x).unwrap();
        g.mark_output(y);

        let (out, _) = apply(&g);
        let out_node = out.node(out.outputs[0]);
        assert_eq!(out_node.op, OpCode::Constant);
        assert_eq!(out.const_pool.get(out_node.imm), Some(0.0));
    }

    #[test]
    fn double_negation_cancels() {
        let mut g = Graph::new();
        let x = g.create_input();
        let nx = g.create_unary(OpCode::Neg, x).unwrap();
        let y = g.create_unary(OpCode::Neg, nx).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        assert_eq!(out.node(out.outputs[0]).op, OpCode::Input);
    }

    #[test]
    fn exp_of_zero_folds_to_one() {
        let mut g = Graph::new();
        let zero = g.create_constant(0.0);
        let y = g.create_unary(OpCode::Exp, zero).unwrap();
        g.mark_output(y);

        let (out, _) = apply(&g);
        let out_node = out.node(out.outputs[0]);
        assert_eq!(out.const_pool.get(out_node.imm), Some(1.0));
    }
}
