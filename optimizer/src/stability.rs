//! Stability cleaning (`spec.md` §4.2.1): rewrite patterns that lose
//! precision or overflow into numerically better equivalents, matched on
//! operand *structure*, never on operand *value* (beyond recognizing a
//! literal `1.0` constant).
//!
//! Runs once, before every other pass, so that a later folding pass never
//! materializes the unstable intermediate (e.g. `1.0/exp(1000.0)` would
//! otherwise fold straight to `0.0`, destroying the gradient).

use forge_ir::{Graph, Node, NodeFlags, NodeId, OpCode};
use tracing::debug;

use crate::PassStats;

const CONST_EPS: f64 = 1e-15;

fn is_constant_value(graph: &Graph, id: NodeId, expected: f64) -> bool {
    if id.is_none() || id.index() >= graph.len() {
        return false;
    }
    let node = graph.node(id);
    if node.op != OpCode::Constant {
        return false;
    }
    match graph.const_pool.get(node.imm) {
        Some(v) => (v - expected).abs() < CONST_EPS,
        None => false,
    }
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

/// Run stability cleaning over `graph`, returning the rewritten graph and
/// the number of rewrites performed.
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

        let mut new_node = Node {
            op: node.op,
            a: remap(&old_to_new, node.a),
            b: remap(&old_to_new, node.b),
            c: remap(&old_to_new, node.c),
            imm: node.imm,
            flags: node.flags,
        };

        let mut handled = false;

        match node.op {
            OpCode::Div => {
                if is_constant_value(graph, node.a, 1.0) && op_of(graph, node.b) == Some(OpCode::Exp)
                {
                    // 1.0 / exp(x) -> exp(neg(x))
                    let exp_node = graph.node(node.b);
                    let x_new = remap(&old_to_new, exp_node.a);

                    let neg_node = Node {
                        op: OpCode::Neg,
                        a: x_new,
                        b: NodeId::NONE,
                        c: NodeId::NONE,
                        imm: 0,
                        flags: exp_node.flags,
                    };
                    let neg_id = result.add_node(neg_node);

                    new_node.op = OpCode::Exp;
                    new_node.a = neg_id;
                    new_node.b = NodeId::NONE;
                    new_node.c = NodeId::NONE;
                    handled = true;
                } else if op_of(graph, node.a) == Some(OpCode::Exp)
                    && op_of(graph, node.b) == Some(OpCode::Exp)
                {
                    // exp(x) / exp(y) -> exp(x - y)
                    let exp_a = graph.node(node.a);
                    let exp_b = graph.node(node.b);
                    let x_new = remap(&old_to_new, exp_a.a);
                    let y_new = remap(&old_to_new, exp_b.a);

                    let mut sub_flags = NodeFlags::empty();
                    sub_flags.set(NodeFlags::ACTIVE, exp_a.is_active() || exp_b.is_active());
                    sub_flags.set(
                        NodeFlags::NEEDS_GRADIENT,
                        exp_a.needs_gradient() || exp_b.needs_gradient(),
                    );
                    let sub_node = Node {
                        op: OpCode::Sub,
                        a: x_new,
                        b: y_new,
                        c: NodeId::NONE,
                        imm: 0,
                        flags: sub_flags,
                    };
                    let sub_id = result.add_node(sub_node);

                    new_node.op = OpCode::Exp;
                    new_node.a = sub_id;
                    new_node.b = NodeId::NONE;
                    new_node.c = NodeId::NONE;
                    handled = true;
                }
            }
            OpCode::Log => {
                if op_of(graph, node.a) == Some(OpCode::Exp) {
                    // log(exp(x)) -> x: redirect, no new node emitted.
                    let exp_input = graph.node(node.a).a;
                    let redirected = remap(&old_to_new, exp_input);
                    old_to_new[old_id.index()] = redirected;
                    rewrites += 1;
                    debug!(node = ?old_id, "stability: log(exp(x)) -> x");
                    continue;
                }
            }
            OpCode::Sqrt => {
                if op_of(graph, node.a) == Some(OpCode::Mul) {
                    let mul_node = graph.node(node.a);
                    if mul_node.a == mul_node.b {
                        // sqrt(x * x) -> abs(x)
                        new_node.op = OpCode::Abs;
                        new_node.a = remap(&old_to_new, mul_node.a);
                        new_node.b = NodeId::NONE;
                        new_node.c = NodeId::NONE;
                        handled = true;
                    }
                }
            }
            _ => {}
        }

        if handled {
            rewrites += 1;
        }

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
    fn rewrites_reciprocal_of_exp() {
        let mut g = Graph::new();
        let x = g.create_input();
        let ex = g.create_unary(OpCode::Exp, x).unwrap();
        let one = g.create_constant(1.0);
        let y = g.create_binary(OpCode::Div, one, ex).unwrap();
        g.mark_output(y);

        let (out, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        let out_node = out.node(out.outputs[0]);
        assert_eq!(out_node.op, OpCode::Exp);
        let neg = out.node(out_node.a);
        assert_eq!(neg.op, OpCode::Neg);
    }

    #[test]
    fn rewrites_ratio_of_exponentials() {
        let mut g = Graph::new();
        let x = g.create_input();
        let y = g.create_input();
        let ex = g.create_unary(OpCode::Exp, x).unwrap();
        let ey = g.create_unary(OpCode::Exp, y).unwrap();
        let out = g.create_binary(OpCode::Div, ex, ey).unwrap();
        g.mark_output(out);

        let (result, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        let out_node = result.node(result.outputs[0]);
        assert_eq!(out_node.op, OpCode::Exp);
        let sub = result.node(out_node.a);
        assert_eq!(sub.op, OpCode::Sub);
    }

    #[test]
    fn redirects_log_of_exp() {
        let mut g = Graph::new();
        let x = g.create_input();
        let ex = g.create_unary(OpCode::Exp, x).unwrap();
        let out = g.create_unary(OpCode::Log, ex).unwrap();
        g.mark_output(out);

        let (result, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        assert_eq!(result.len(), 2); // Input, Exp only; Log redirected away
        assert_eq!(result.node(result.outputs[0]).op, OpCode::Input);
    }

    #[test]
    fn rewrites_sqrt_of_square() {
        let mut g = Graph::new();
        let x = g.create_input();
        let xx = g.create_binary(OpCode::Mul, x, x).unwrap();
        let out = g.create_unary(OpCode::Sqrt, xx).unwrap();
        g.mark_output(out);

        let (result, stats) = apply(&g);
        assert_eq!(stats.rewrites, 1);
        assert_eq!(result.node(result.outputs[0]).op, OpCode::Abs);
    }
}
