//! `ExecutableKernel` (`spec.md` §4.5): compiles an optimized
//! [`forge_ir::Graph`] into native code via a backend's [`InstructionSet`]
//! and owns the resulting [`cranelift_jit::JITModule`].
//!
//! Grounded in the teacher's
//! `compiler/backend/src/cranelift/compiler.rs`'s `CraneliftBackend` —
//! same declare/define/finalize two-phase `Module` lifecycle, same
//! `JITBuilder::with_isa` + `default_libcall_names` construction. The
//! kernel body itself is always one basic block (`spec.md` §4.4 never
//! branches), so unlike the teacher's `SSATranslator` this crate never
//! needs block-sealing or phi-node bookkeeping beyond the single entry
//! block.

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, Signature};
use cranelift_codegen::isa::CallConv;
use cranelift_codegen::settings::{self, Configurable, Flags};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use forge_ir::Graph;
use tracing::{info, instrument};

use crate::codegen::{Codegen, ExternalCalls};
use crate::emitter::{CompilationPolicy, DefaultPolicy, ForwardEmitter, GradientEmitter};
use crate::error::{BackendError, Result};
use crate::isa::InstructionSet;
use crate::register_allocator::RegisterAllocator;

extern "C" fn host_exp(x: f64) -> f64 {
    x.exp()
}
extern "C" fn host_log(x: f64) -> f64 {
    x.ln()
}
extern "C" fn host_sin(x: f64) -> f64 {
    x.sin()
}
extern "C" fn host_cos(x: f64) -> f64 {
    x.cos()
}
extern "C" fn host_tan(x: f64) -> f64 {
    x.tan()
}
extern "C" fn host_pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

/// The ABI `spec.md` §6 documents: `(double* values, double* gradients,
/// size_t node_count) -> void`, host C calling convention.
pub type KernelFn = unsafe extern "C" fn(*mut f64, *mut f64, usize);

/// Owns a finalized JIT module and exposes the compiled kernel's entry
/// point. Movable, not `Copy`: dropping it releases the executable pages
/// via `JITModule`'s own `Drop`. Reentrant (`spec.md` §5) — `call` borrows
/// `&self` only and touches no interior mutable state.
pub struct ExecutableKernel {
    // Kept alive for as long as `entry` may be called; never read after
    // construction.
    #[allow(dead_code)]
    module: JITModule,
    entry: KernelFn,
    pub backend_name: &'static str,
    pub vector_width: usize,
    pub node_count: usize,
    pub emits_gradients: bool,
}

impl ExecutableKernel {
    /// Compile `graph` (already optimized) with `isa`, running
    /// [`GradientEmitter`] as well if the graph has any gradient-marked
    /// outputs.
    #[instrument(skip(graph, isa, policy))]
    pub fn compile<P: CompilationPolicy>(
        graph: &Graph,
        isa: &dyn InstructionSet,
        policy: &P,
    ) -> Result<Self> {
        let meta = isa.meta();
        let emits_gradients = !graph.diff_inputs.is_empty();

        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;
        let flags = Flags::new(flag_builder);
        let isa_target = cranelift_codegen::isa::lookup(target_lexicon::Triple::host())
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?
            .finish(flags)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;

        let mut jit_builder =
            JITBuilder::with_isa(isa_target, cranelift_module::default_libcall_names());
        jit_builder.symbol("forge_host_exp", host_exp as *const u8);
        jit_builder.symbol("forge_host_log", host_log as *const u8);
        jit_builder.symbol("forge_host_sin", host_sin as *const u8);
        jit_builder.symbol("forge_host_cos", host_cos as *const u8);
        jit_builder.symbol("forge_host_tan", host_tan as *const u8);
        jit_builder.symbol("forge_host_pow", host_pow as *const u8);
        let mut module = JITModule::new(jit_builder);

        let pointer_ty = module.target_config().pointer_type();
        let unary_sig = {
            let mut sig = Signature::new(CallConv::SystemV);
            sig.params.push(AbiParam::new(types::F64));
            sig.returns.push(AbiParam::new(types::F64));
            sig
        };
        let binary_sig = {
            let mut sig = Signature::new(CallConv::SystemV);
            sig.params.push(AbiParam::new(types::F64));
            sig.params.push(AbiParam::new(types::F64));
            sig.returns.push(AbiParam::new(types::F64));
            sig
        };

        let exp_id = module
            .declare_function("forge_host_exp", Linkage::Import, &unary_sig)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;
        let log_id = module
            .declare_function("forge_host_log", Linkage::Import, &unary_sig)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;
        let sin_id = module
            .declare_function("forge_host_sin", Linkage::Import, &unary_sig)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;
        let cos_id = module
            .declare_function("forge_host_cos", Linkage::Import, &unary_sig)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;
        let tan_id = module
            .declare_function("forge_host_tan", Linkage::Import, &unary_sig)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;
        let pow_id = module
            .declare_function("forge_host_pow", Linkage::Import, &binary_sig)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;

        let mut kernel_sig = Signature::new(CallConv::SystemV);
        kernel_sig.params.push(AbiParam::new(pointer_ty));
        kernel_sig.params.push(AbiParam::new(pointer_ty));
        kernel_sig.params.push(AbiParam::new(pointer_ty));

        let kernel_id = module
            .declare_function("forge_kernel", Linkage::Export, &kernel_sig)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;

        let mut ctx = Context::new();
        ctx.func.signature = kernel_sig;

        let exp_ref = module.declare_func_in_func(exp_id, &mut ctx.func);
        let log_ref = module.declare_func_in_func(log_id, &mut ctx.func);
        let sin_ref = module.declare_func_in_func(sin_id, &mut ctx.func);
        let cos_ref = module.declare_func_in_func(cos_id, &mut ctx.func);
        let tan_ref = module.declare_func_in_func(tan_id, &mut ctx.func);
        let pow_ref = module.declare_func_in_func(pow_id, &mut ctx.func);
        let calls = ExternalCalls {
            exp: exp_ref,
            log: log_ref,
            sin: sin_ref,
            cos: cos_ref,
            tan: tan_ref,
            pow: pow_ref,
        };

        let mut builder_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
            let entry_block = builder.create_block();
            builder.append_block_params_for_function_params(entry_block);
            builder.switch_to_block(entry_block);
            builder.seal_block(entry_block);

            let params = builder.block_params(entry_block);
            let values_ptr = params[0];
            let gradients_ptr = params[1];
            // `count` (params[2]) is part of the documented ABI but this
            // backend needs no runtime length check: every load/store
            // offset is a compile-time immediate derived from the graph
            // actually compiled.

            let mut cg = Codegen::new(
                &mut builder,
                meta.max_registers,
                values_ptr,
                gradients_ptr,
                meta.vector_width,
                calls,
            );
            let mut ra = RegisterAllocator::new(meta.max_registers);

            ForwardEmitter::new(policy).emit(graph, isa, &mut cg, &mut ra)?;
            if emits_gradients {
                GradientEmitter::emit(graph, &mut cg);
            }

            builder.ins().return_(&[]);
            builder.finalize();
        }

        module
            .define_function(kernel_id, &mut ctx)
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;
        module.clear_context(&mut ctx);
        module
            .finalize_definitions()
            .map_err(|e| BackendError::CodeGeneration(e.to_string()))?;

        let raw = module.get_finalized_function(kernel_id);
        // SAFETY: `raw` points at code just finalized above with exactly
        // the `kernel_sig` signature, which matches `KernelFn`.
        let entry: KernelFn = unsafe { std::mem::transmute(raw) };

        info!(
            backend = meta.name,
            nodes = graph.len(),
            emits_gradients,
            "kernel compiled"
        );

        Ok(Self {
            module,
            entry,
            backend_name: meta.name,
            vector_width: meta.vector_width,
            node_count: graph.len(),
            emits_gradients,
        })
    }

    pub fn compile_default(graph: &Graph, isa: &dyn InstructionSet) -> Result<Self> {
        Self::compile(graph, isa, &DefaultPolicy)
    }

    /// Invoke the compiled kernel. `values` and `gradients` must each be at
    /// least `node_count * vector_width` doubles, 32-byte aligned
    /// (`spec.md` §4.6); `gradients` may be null only if
    /// [`Self::emits_gradients`] is `false`.
    ///
    /// # Safety
    /// The caller must uphold the buffer-size and alignment contract above;
    /// this function performs no bounds checking, matching the raw-pointer
    /// ABI `spec.md` §6 specifies.
    pub unsafe fn call(&self, values: *mut f64, gradients: *mut f64, node_count: usize) {
        (self.entry)(values, gradients, node_count)
    }
}
