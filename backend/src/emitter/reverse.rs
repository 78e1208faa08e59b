//! `GradientEmitter` (`spec.md` §4.4.2): reverse-mode accumulation over an
//! already forward-emitted graph.
//!
//! Grounded in `original_source/src/compiler/gradient_stitcher.cpp`'s
//! per-opcode derivative table; the one deliberate deviation from it is
//! noted inline at `OpCode::Mod` (`spec.md` §9 Open Question, resolved in
//! `DESIGN.md`: the divisor's gradient is omitted rather than approximated).
//!
//! Unlike [`crate::emitter::ForwardEmitter`], this pass never holds a
//! node's value in a logical register across iterations — every operand
//! value it needs is reloaded straight from the value buffer (already
//! populated by the forward pass) and every gradient contribution is a
//! read-add-write against the gradient buffer
//! ([`Codegen::accumulate_gradient_slot`]). That keeps the pass a pure
//! function of already-materialized buffers, with no register-allocator
//! bookkeeping to get wrong.

use cranelift_codegen::ir::condcodes::FloatCC;
use cranelift_codegen::ir::InstBuilder;
use forge_ir::{Graph, NodeId, OpCode};
use tracing::trace;

use crate::codegen::Codegen;

/// The denominator floor in `Abs`'s `x / (|x| + eps)` sign trick, needed
/// because `Abs` has no derivative at zero. `spec.md` §4.4.2 pins this to
/// `eps≈1e-300`; matches `gradient_stitcher.cpp:206`'s `emitLoadImmediate(a,
/// 4, 1e-300)` verbatim.
const SIGN_EPS: f64 = 1e-300;

pub struct GradientEmitter;

impl GradientEmitter {
    /// Seed every gradient-marked output's own gradient slot to `1.0`, then
    /// walk the graph in decreasing id order accumulating into every live
    /// node's operands. No-op if `graph.diff_inputs` is empty (`spec.md`:
    /// the pass "runs only if any output has `needsGradient`").
    pub fn emit(graph: &Graph, cg: &mut Codegen) {
        if graph.diff_inputs.is_empty() {
            return;
        }

        for &out in &graph.outputs {
            if graph.node(out).needs_gradient() {
                let one = cg.immediate(1.0);
                cg.store_gradient_slot(out.0, one);
            }
        }

        for idx in (0..graph.len()).rev() {
            let id = NodeId(idx as u32);
            let node = *graph.node(id);
            if node.is_dead() || !node.needs_gradient() {
                continue;
            }
            Self::accumulate(graph, cg, id, node.op, node.a, node.b, node.c);
            trace!(node = id.0, op = ?node.op, "reverse: accumulated");
        }
    }

    fn accumulate(
        graph: &Graph,
        cg: &mut Codegen,
        id: NodeId,
        op: OpCode,
        a: NodeId,
        b: NodeId,
        c: NodeId,
    ) {
        let g = cg.load_gradient_slot(id.0);

        let load = |cg: &mut Codegen, n: NodeId| cg.load_value_slot(n.0);
        let needs = |n: NodeId| !n.is_none() && graph.node(n).needs_gradient();

        match op {
            OpCode::Add => {
                if needs(a) {
                    cg.accumulate_gradient_slot(a.0, g);
                }
                if needs(b) {
                    cg.accumulate_gradient_slot(b.0, g);
                }
            }
            OpCode::Sub => {
                if needs(a) {
                    cg.accumulate_gradient_slot(a.0, g);
                }
                if needs(b) {
                    let neg_g = cg.builder.ins().fneg(g);
                    cg.accumulate_gradient_slot(b.0, neg_g);
                }
            }
            OpCode::Mul => {
                if needs(a) {
                    let bv = load(cg, b);
                    let d = cg.builder.ins().fmul(g, bv);
                    cg.accumulate_gradient_slot(a.0, d);
                }
                if needs(b) {
                    let av = load(cg, a);
                    let d = cg.builder.ins().fmul(g, av);
                    cg.accumulate_gradient_slot(b.0, d);
                }
            }
            OpCode::Div => {
                let av = load(cg, a);
                let bv = load(cg, b);
                if needs(a) {
                    let d = cg.builder.ins().fdiv(g, bv);
                    cg.accumulate_gradient_slot(a.0, d);
                }
                if needs(b) {
                    // d/db (a/b) = -a / b^2
                    let b2 = cg.builder.ins().fmul(bv, bv);
                    let num = cg.builder.ins().fmul(g, av);
                    let num = cg.builder.ins().fneg(num);
                    let d = cg.builder.ins().fdiv(num, b2);
                    cg.accumulate_gradient_slot(b.0, d);
                }
            }
            OpCode::Neg => {
                if needs(a) {
                    let neg_g = cg.builder.ins().fneg(g);
                    cg.accumulate_gradient_slot(a.0, neg_g);
                }
            }
            OpCode::Abs => {
                if needs(a) {
                    let av = load(cg, a);
                    let abs_a = cg.builder.ins().fabs(av);
                    let eps = cg.immediate(SIGN_EPS);
                    let denom = cg.builder.ins().fadd(abs_a, eps);
                    let sign = cg.builder.ins().fdiv(av, denom);
                    let d = cg.builder.ins().fmul(g, sign);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Square => {
                if needs(a) {
                    let av = load(cg, a);
                    let two = cg.immediate(2.0);
                    let two_a = cg.builder.ins().fmul(two, av);
                    let d = cg.builder.ins().fmul(g, two_a);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Recip => {
                if needs(a) {
                    // node value is 1/a; d/da = -(1/a)^2.
                    let self_v = load(cg, id);
                    let sq = cg.builder.ins().fmul(self_v, self_v);
                    let neg_sq = cg.builder.ins().fneg(sq);
                    let d = cg.builder.ins().fmul(g, neg_sq);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Mod => {
                // d/da == 1 treating b as locally constant; the divisor's
                // own gradient is omitted (`spec.md` §9 Open Question,
                // resolved "omit" in DESIGN.md) rather than approximated
                // with the discontinuous floor-division derivative.
                if needs(a) {
                    cg.accumulate_gradient_slot(a.0, g);
                }
            }
            OpCode::Sqrt => {
                if needs(a) {
                    let self_v = load(cg, id);
                    let two = cg.immediate(2.0);
                    let denom = cg.builder.ins().fmul(two, self_v);
                    let d = cg.builder.ins().fdiv(g, denom);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Exp => {
                if needs(a) {
                    let self_v = load(cg, id);
                    let d = cg.builder.ins().fmul(g, self_v);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Log => {
                if needs(a) {
                    let av = load(cg, a);
                    let d = cg.builder.ins().fdiv(g, av);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Pow => {
                let av = load(cg, a);
                let bv = load(cg, b);
                let self_v = load(cg, id);
                if needs(a) {
                    // d/da (a^b) = b * a^(b-1) = b * self / a
                    let t = cg.builder.ins().fmul(bv, self_v);
                    let t = cg.builder.ins().fdiv(t, av);
                    let d = cg.builder.ins().fmul(g, t);
                    cg.accumulate_gradient_slot(a.0, d);
                }
                if needs(b) {
                    // d/db (a^b) = a^b * ln(a); ln(a) needs a transcendental
                    // call, so the volatile range is invalidated afterward
                    // exactly as the forward pass does for its own calls.
                    let ln_a = cg.call_unary_transcendental(cg.calls.log, av);
                    let t = cg.builder.ins().fmul(self_v, ln_a);
                    let d = cg.builder.ins().fmul(g, t);
                    cg.accumulate_gradient_slot(b.0, d);
                }
            }
            OpCode::Sin => {
                if needs(a) {
                    let av = load(cg, a);
                    let cos_a = cg.call_unary_transcendental(cg.calls.cos, av);
                    let d = cg.builder.ins().fmul(g, cos_a);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Cos => {
                if needs(a) {
                    let av = load(cg, a);
                    let sin_a = cg.call_unary_transcendental(cg.calls.sin, av);
                    let neg_sin = cg.builder.ins().fneg(sin_a);
                    let d = cg.builder.ins().fmul(g, neg_sin);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Tan => {
                if needs(a) {
                    // d/dx tan(x) = 1 + tan(x)^2; the node's own value is
                    // already tan(a), so no extra call is needed.
                    let self_v = load(cg, id);
                    let sq = cg.builder.ins().fmul(self_v, self_v);
                    let one = cg.immediate(1.0);
                    let sec2 = cg.builder.ins().fadd(one, sq);
                    let d = cg.builder.ins().fmul(g, sec2);
                    cg.accumulate_gradient_slot(a.0, d);
                }
            }
            OpCode::Min | OpCode::Max => {
                let av = load(cg, a);
                let bv = load(cg, b);
                let cc = if op == OpCode::Min {
                    FloatCC::LessThanOrEqual
                } else {
                    FloatCC::GreaterThanOrEqual
                };
                let a_wins = cg.builder.ins().fcmp(cc, av, bv);
                let zero = cg.zero();
                let g_to_a = cg.builder.ins().select(a_wins, g, zero);
                let g_to_b = cg.builder.ins().select(a_wins, zero, g);
                if needs(a) {
                    cg.accumulate_gradient_slot(a.0, g_to_a);
                }
                if needs(b) {
                    cg.accumulate_gradient_slot(b.0, g_to_b);
                }
            }
            OpCode::If => {
                let cv = load(cg, c);
                let zero = cg.zero();
                let cond = cg.builder.ins().fcmp(FloatCC::NotEqual, cv, zero);
                if needs(a) {
                    let d = cg.builder.ins().select(cond, g, zero);
                    cg.accumulate_gradient_slot(a.0, d);
                }
                if needs(b) {
                    let d = cg.builder.ins().select(cond, zero, g);
                    cg.accumulate_gradient_slot(b.0, d);
                }
                // `c` is the selector, not a differentiable operand.
            }
            OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge | OpCode::Eq | OpCode::Ne => {
                // Comparisons contribute zero gradient everywhere — there is
                // nothing to accumulate.
            }
            OpCode::And | OpCode::Or | OpCode::Not => {
                // Boolean logic over the 1.0/0.0 convention is not
                // differentiable; `spec.md` §4.4.2 does not list these.
            }
            OpCode::Input | OpCode::Constant => {
                // Sources never receive a gradient contribution from
                // themselves.
            }
            OpCode::IntAdd | OpCode::IntSub | OpCode::IntMul | OpCode::ArrayIndex => {
                // Reserved, never constructed by this crate's builder.
            }
        }
    }
}
