//! Shared Cranelift code-generation context threaded through every
//! emission primitive in `isa.rs`.
//!
//! The compiled kernel body is always a single straight-line basic block:
//! `spec.md` §4.4 never emits a conditional branch (`If` lowers to an
//! arithmetic blend, comparisons never affect control flow), so there is no
//! control-flow graph to build and no block sealing beyond the one entry
//! block. This lets `Codegen` track each logical register's current value
//! as a plain [`Value`] in a `Vec`, exactly like
//! `quivent-fifth/compiler/backend/src/cranelift/translator.rs`'s
//! `register_values: HashMap<Register, Value>` — re-binding a logical
//! register for a new result is just overwriting that `Vec` slot, not a
//! Cranelift `Variable` mutation, because nothing here ever needs a value
//! merged across block boundaries.

use cranelift_codegen::ir::{types, FuncRef, InstBuilder, MemFlags, Type, Value};
use cranelift_frontend::FunctionBuilder;

/// `FuncRef`s for the libm transcendentals Cranelift has no native
/// instruction for (`spec.md` §4.3's transcendental primitive group).
/// Declared once per compiled function by `kernel.rs` via
/// `Module::declare_func_in_func`, then threaded through every emitter call
/// that needs one.
#[derive(Debug, Clone, Copy)]
pub struct ExternalCalls {
    pub exp: FuncRef,
    pub log: FuncRef,
    pub sin: FuncRef,
    pub cos: FuncRef,
    pub tan: FuncRef,
    pub pow: FuncRef,
}

/// Per-node byte stride in the value/gradient buffers: `lane_count * 8`
/// (`spec.md` §4.6's `base + node_id * lane_count * 8`).
pub fn node_stride_bytes(lane_count: usize) -> i64 {
    (lane_count as i64) * 8
}

pub struct Codegen<'a, 'b> {
    pub builder: &'a mut FunctionBuilder<'b>,
    /// Logical register file: `reg_values[i]` is the Cranelift SSA value
    /// currently held by logical register `i`, or `None` if the register
    /// allocator considers it empty.
    pub reg_values: Vec<Option<Value>>,
    pub values_ptr: Value,
    pub gradients_ptr: Value,
    pub lane_count: usize,
    /// `types::F64` for the scalar backend, `F64X4` for the 4-wide one.
    pub lane_ty: Type,
    pub mem_flags: MemFlags,
    pub calls: ExternalCalls,
}

impl<'a, 'b> Codegen<'a, 'b> {
    pub fn new(
        builder: &'a mut FunctionBuilder<'b>,
        num_registers: usize,
        values_ptr: Value,
        gradients_ptr: Value,
        lane_count: usize,
        calls: ExternalCalls,
    ) -> Self {
        let lane_ty = if lane_count == 1 {
            types::F64
        } else {
            types::F64X4
        };
        Self {
            builder,
            reg_values: vec![None; num_registers],
            values_ptr,
            gradients_ptr,
            lane_count,
            lane_ty,
            // Buffers are 32-byte aligned (`spec.md` §4.6) but a backend is
            // free to emit unaligned loads; we ask Cranelift for unaligned,
            // notrap (the buffer is always large enough by construction).
            mem_flags: MemFlags::new().with_notrap(),
            calls,
        }
    }

    pub fn get(&self, reg: usize) -> Value {
        self.reg_values[reg].expect("register read before a value was bound")
    }

    pub fn set(&mut self, reg: usize, value: Value) {
        self.reg_values[reg] = Some(value);
    }

    fn value_offset(&self, node_id: u32) -> i32 {
        (node_id as i64 * node_stride_bytes(self.lane_count)) as i32
    }

    pub fn load_value_slot(&mut self, node_id: u32) -> Value {
        let off = self.value_offset(node_id);
        self.builder
            .ins()
            .load(self.lane_ty, self.mem_flags, self.values_ptr, off)
    }

    pub fn store_value_slot(&mut self, node_id: u32, value: Value) {
        let off = self.value_offset(node_id);
        self.builder
            .ins()
            .store(self.mem_flags, value, self.values_ptr, off);
    }

    pub fn load_gradient_slot(&mut self, node_id: u32) -> Value {
        let off = self.value_offset(node_id);
        self.builder
            .ins()
            .load(self.lane_ty, self.mem_flags, self.gradients_ptr, off)
    }

    pub fn store_gradient_slot(&mut self, node_id: u32, value: Value) {
        let off = self.value_offset(node_id);
        self.builder
            .ins()
            .store(self.mem_flags, value, self.gradients_ptr, off);
    }

    /// Read-add-write accumulation into a gradient slot (`spec.md` §4.4.2:
    /// "never a plain store").
    pub fn accumulate_gradient_slot(&mut self, node_id: u32, delta: Value) {
        let current = self.load_gradient_slot(node_id);
        let sum = self.builder.ins().fadd(current, delta);
        self.store_gradient_slot(node_id, sum);
    }

    /// Load an immediate double, broadcast across all lanes for a vector
    /// backend (`spec.md` §4.3's "load from constant pool... broadcast for
    /// vector backends").
    pub fn immediate(&mut self, value: f64) -> Value {
        let scalar = self.builder.ins().f64const(value);
        self.broadcast(scalar)
    }

    pub fn broadcast(&mut self, scalar: Value) -> Value {
        if self.lane_count == 1 {
            scalar
        } else {
            self.builder.ins().splat(self.lane_ty, scalar)
        }
    }

    pub fn zero(&mut self) -> Value {
        self.immediate(0.0)
    }

    /// Call a scalar `f64 -> f64` libm function, lane by lane for a vector
    /// backend. Cranelift has no vectorized transcendentals, so AVX2's
    /// `Avx2Backend` still pays one scalar call per lane — documented in
    /// DESIGN.md as the deliberate "uniform scalar libm, no vector math
    /// library" simplification spec.md §4.3 allows ("each backend may use a
    /// different vectorized library").
    pub fn call_unary_transcendental(&mut self, func: FuncRef, arg: Value) -> Value {
        if self.lane_count == 1 {
            let call = self.builder.ins().call(func, &[arg]);
            self.builder.inst_results(call)[0]
        } else {
            let mut result = self.zero();
            for lane in 0..self.lane_count as u8 {
                let scalar = self.builder.ins().extractlane(arg, lane);
                let call = self.builder.ins().call(func, &[scalar]);
                let out = self.builder.inst_results(call)[0];
                result = self.builder.ins().insertlane(result, out, lane);
            }
            result
        }
    }

    /// As [`Self::call_unary_transcendental`] but for a two-argument libm
    /// function (`pow`).
    pub fn call_binary_transcendental(&mut self, func: FuncRef, a: Value, b: Value) -> Value {
        if self.lane_count == 1 {
            let call = self.builder.ins().call(func, &[a, b]);
            self.builder.inst_results(call)[0]
        } else {
            let mut result = self.zero();
            for lane in 0..self.lane_count as u8 {
                let sa = self.builder.ins().extractlane(a, lane);
                let sb = self.builder.ins().extractlane(b, lane);
                let call = self.builder.ins().call(func, &[sa, sb]);
                let out = self.builder.inst_results(call)[0];
                result = self.builder.ins().insertlane(result, out, lane);
            }
            result
        }
    }
}
