//! `ForwardEmitter` (`spec.md` §4.4.1): walks the optimized graph once, in
//! increasing [`NodeId`] order, emitting one value per live node.
//!
//! Grounded in `original_source/src/compiler/forward_forging.hpp`'s
//! single linear pass plus `original_source/src/compiler/interfaces/compilation_policy.hpp`'s
//! injection points; the three hooks here (`should_store_now`,
//! `preferred_register`, `known_register`) are this file's `requiresStore`,
//! `preferredRegister`, and `findValueRegister` renamed to this crate's
//! `snake_case` convention, one hook for one hook.

use forge_ir::{Graph, NodeId, OpCode};
use tracing::trace;

use crate::codegen::Codegen;
use crate::error::Result;
use crate::isa::{InstructionSet, Operands};
use crate::register_allocator::RegisterAllocator;

/// Scheduling hooks a caller may override to change *when* a node's result
/// reaches its value-buffer slot, without ever changing *what* value is
/// computed (`spec.md` §4.4.1). The default implementation stores every
/// node immediately, which is always correct; overriding it can save
/// stores for values the caller already knows it won't need to keep in
/// the buffer (e.g. intermediate nodes that are neither outputs nor
/// referenced by the gradient pass) at the cost of author-level guarantees
/// the default can't verify itself.
pub trait CompilationPolicy {
    fn should_store_now(&self, _node: NodeId) -> bool {
        true
    }

    /// Suggest a logical register for `node`'s result, consulted before
    /// falling back to [`RegisterAllocator::allocate_avoiding`].
    fn preferred_register(&self, _node: NodeId) -> Option<usize> {
        None
    }

    /// Assert that `node`'s value is already resident in a specific
    /// register (e.g. a loop-invariant hoisted by the caller); skips the
    /// usual load/allocate path entirely when it returns `Some`.
    fn known_register(&self, _node: NodeId) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl CompilationPolicy for DefaultPolicy {}

pub struct ForwardEmitter<'p, P: CompilationPolicy = DefaultPolicy> {
    policy: &'p P,
}

impl<'p, P: CompilationPolicy> ForwardEmitter<'p, P> {
    pub fn new(policy: &'p P) -> Self {
        Self { policy }
    }

    /// Emit every live node of `graph` into `cg`, in the order `spec.md`
    /// §4.4.1 requires (ascending id, dead nodes skipped). Returns nothing:
    /// callers that need gradients run [`crate::emitter::GradientEmitter`]
    /// afterward over the same `cg`/`ra`.
    pub fn emit(
        &self,
        graph: &Graph,
        isa: &dyn InstructionSet,
        cg: &mut Codegen,
        ra: &mut RegisterAllocator,
    ) -> Result<()> {
        for idx in 0..graph.len() {
            let id = NodeId(idx as u32);
            let node = *graph.node(id);
            if node.is_dead() {
                continue;
            }

            if let Some(known) = self.policy.known_register(id) {
                ra.bind(known, id, false);
                continue;
            }

            match node.op {
                OpCode::Input => {
                    let dst = self.allocate_for(ra, id);
                    let v = cg.load_value_slot(id.0);
                    cg.set(dst, v);
                    ra.mark_clean(dst);
                }
                OpCode::Constant => {
                    let dst = self.allocate_for(ra, id);
                    let imm = graph
                        .const_pool
                        .get(node.imm)
                        .expect("constant index in range");
                    let v = cg.immediate(imm);
                    cg.set(dst, v);
                    ra.mark_clean(dst);
                }
                _ => {
                    let a = self.resolve_operand(graph, cg, ra, node.a);
                    let b = self.resolve_operand(graph, cg, ra, node.b);
                    let c = self.resolve_operand(graph, cg, ra, node.c);
                    let avoid: Vec<usize> = [a, b, c].into_iter().flatten().collect();
                    let dst = ra.allocate_avoiding(&avoid)?;
                    ra.bind(dst, id, true);

                    isa.emit(
                        cg,
                        ra,
                        node.op,
                        dst,
                        Operands {
                            a: a.unwrap_or(dst),
                            b: b.unwrap_or(dst),
                            c: c.unwrap_or(dst),
                        },
                        None,
                    )?;

                    let is_call = matches!(
                        node.op,
                        OpCode::Exp | OpCode::Log | OpCode::Sin | OpCode::Cos | OpCode::Tan | OpCode::Pow
                    );
                    if is_call {
                        ra.invalidate_volatile(isa.volatile_registers());
                        ra.bind(dst, id, true);
                        // The call clobbers nothing at the logical level
                        // (see `InstructionSet::volatile_registers`), but we
                        // still re-bind `dst` in case an empty range caused
                        // `invalidate_volatile` to touch it.
                    }
                }
            }

            if self.policy.should_store_now(id) {
                if let Some(reg) = ra.find(id) {
                    let v = cg.get(reg);
                    cg.store_value_slot(id.0, v);
                    ra.mark_clean(reg);
                }
            }
            trace!(node = id.0, "forward: emitted");
        }

        Ok(())
    }

    fn allocate_for(&self, ra: &mut RegisterAllocator, id: NodeId) -> usize {
        let reg = match self.policy.preferred_register(id) {
            Some(r) if !ra.is_locked(r) && !ra.is_blacklisted(r) => r,
            _ => ra.allocate().expect("register allocation must not fail for a source node"),
        };
        ra.bind(reg, id, false);
        reg
    }

    /// Make sure `id`'s value is resident in a register, reusing it if the
    /// allocator still holds it, otherwise reloading from its value slot
    /// (it was stored there when it was first computed, since the default
    /// policy always stores). Returns `None` for [`NodeId::NONE`] operand
    /// slots.
    fn resolve_operand(
        &self,
        graph: &Graph,
        cg: &mut Codegen,
        ra: &mut RegisterAllocator,
        id: NodeId,
    ) -> Option<usize> {
        if id.is_none() {
            return None;
        }
        if let Some(reg) = ra.find(id) {
            return Some(reg);
        }
        let reg = ra.allocate().expect("register allocation must not fail for an operand reload");
        let v = cg.load_value_slot(id.0);
        cg.set(reg, v);
        ra.bind(reg, id, false);
        let _ = graph;
        Some(reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_always_stores() {
        let p = DefaultPolicy;
        assert!(p.should_store_now(NodeId(0)));
        assert_eq!(p.preferred_register(NodeId(0)), None);
        assert_eq!(p.known_register(NodeId(0)), None);
    }
}
