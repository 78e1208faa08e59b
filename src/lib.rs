//! Forge: a just-in-time compiler that turns a recorded graph of scalar
//! double-precision operations, with optional reverse-mode automatic
//! differentiation, into native machine code via `cranelift-jit`.
//!
//! This crate is the facade over `forge-ir` (the IR and graph builder),
//! `forge-optimizer` (the rewrite pipeline) and `forge-backend` (the
//! register allocator, forward/gradient emitters, executable kernel and
//! value/gradient buffers): [`ForgeEngine`] wires the three together behind
//! the configuration surface `spec.md` §6 describes.
//!
//! ```
//! use forge::{CompilerConfig, ForgeEngine};
//! use forge_ir::{Graph, OpCode};
//!
//! let mut graph = Graph::new();
//! let x = graph.create_input();
//! graph.mark_diff_input(x);
//! let x2 = graph.create_binary(OpCode::Mul, x, x).unwrap();
//! let one = graph.create_constant(1.0);
//! let y = graph.create_binary(OpCode::Add, x2, one).unwrap();
//! graph.mark_output(y);
//!
//! let engine = ForgeEngine::new(CompilerConfig::default()).unwrap();
//! let program = engine.compile(&graph).unwrap();
//!
//! let (mut values, mut gradients) = program.allocate_buffers().unwrap();
//! values.set_value(x.0, program.vector_width(), 2.0);
//! unsafe { program.call(&mut values, gradients.as_mut()) };
//! assert_eq!(values.get_value(y.0, program.vector_width()), 5.0);
//! ```

pub mod error;

pub use error::{ForgeError, Result};
pub use forge_backend::{Buffer, ExecutableKernel};
pub use forge_ir::{Graph, GraphError, Node, NodeId, OpCode};
pub use forge_optimizer::{NodeIdMap, OptimizerConfig, OptimizerError};

use std::marker::PhantomData;

use forge_backend::Runtime;
use forge_optimizer::Optimizer;
use tracing::{info, instrument};

/// Default instruction set used when neither [`CompilerConfig::instruction_set_name`]
/// nor the `FORGE_INSTRUCTION_SET` environment variable names one (`spec.md`
/// §6).
const DEFAULT_INSTRUCTION_SET: &str = "SSE2";

/// The full configuration surface `spec.md` §6 lists for the compiler.
///
/// `enable_optimizations` is the master gate: when `false`, every rewrite
/// pass except stability cleaning is skipped regardless of the individual
/// `enable_*` flags, because stability cleaning is numerically motivated
/// rather than a size/speed optimization (`spec.md` §6). `enable_debug_recording`
/// and the `print_*` diagnostics are accepted here so a config loaded from a
/// caller's own file doesn't fail to parse, but they are no-ops — the trace
/// buffer and diagnostic dumps they'd drive are an out-of-scope external
/// collaborator (`spec.md` §1).
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub enable_optimizations: bool,
    pub enable_stability: bool,
    pub enable_inactive_folding: bool,
    pub enable_cse: bool,
    pub enable_algebraic: bool,
    pub enable_constant_cleanup: bool,
    pub max_optimization_passes: usize,
    /// Explicit backend name (`"SSE2"`, `"SSE2-Scalar"`, `"AVX2"`,
    /// `"AVX2-Packed"`, or a dynamically loaded plugin's registered name).
    /// Falls back to `FORGE_INSTRUCTION_SET`, then to
    /// [`DEFAULT_INSTRUCTION_SET`], when `None`.
    pub instruction_set_name: Option<String>,
    /// Run [`Graph::validate`] before compiling.
    pub validate_graph: bool,
    /// Accepted, no-op: the trace-recording layer is out of scope (`spec.md` §1).
    pub enable_debug_recording: bool,
    /// Accepted, no-op: diagnostic IR dumps are out of scope (`spec.md` §1).
    pub print_unoptimized_graph: bool,
    /// Accepted, no-op: diagnostic IR dumps are out of scope (`spec.md` §1).
    pub print_optimized_graph: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            enable_optimizations: true,
            enable_stability: true,
            enable_inactive_folding: false,
            enable_cse: false,
            enable_algebraic: false,
            enable_constant_cleanup: false,
            max_optimization_passes: 5,
            instruction_set_name: None,
            validate_graph: true,
            enable_debug_recording: false,
            print_unoptimized_graph: false,
            print_optimized_graph: false,
        }
    }
}

impl CompilerConfig {
    /// Every rewrite pass enabled — convenience entry point mentioned in
    /// `DESIGN.md`, resolving to [`forge_optimizer::OptimizerConfig::all_enabled`].
    pub fn all_optimizations() -> Self {
        Self {
            enable_inactive_folding: true,
            enable_cse: true,
            enable_algebraic: true,
            enable_constant_cleanup: true,
            ..Self::default()
        }
    }

    fn optimizer_config(&self) -> OptimizerConfig {
        if !self.enable_optimizations {
            return OptimizerConfig {
                stability: self.enable_stability,
                inactive_folding: false,
                cse: false,
                algebraic: false,
                constant_cleanup: false,
                max_passes: self.max_optimization_passes,
                step_debug: self.enable_debug_recording,
            };
        }
        OptimizerConfig {
            stability: self.enable_stability,
            inactive_folding: self.enable_inactive_folding,
            cse: self.enable_cse,
            algebraic: self.enable_algebraic,
            constant_cleanup: self.enable_constant_cleanup,
            max_passes: self.max_optimization_passes,
            step_debug: self.enable_debug_recording,
        }
    }

    fn resolve_instruction_set_name(&self) -> String {
        self.instruction_set_name
            .clone()
            .or_else(|| std::env::var("FORGE_INSTRUCTION_SET").ok())
            .unwrap_or_else(|| DEFAULT_INSTRUCTION_SET.to_string())
    }
}

/// Single-thread-use compilation context (`spec.md` §5: "`ForgeEngine`
/// (compilation context): single-thread-use; create per thread"). Holds no
/// state that would make sharing across threads meaningful — each call to
/// [`ForgeEngine::compile`] builds its own `Optimizer` pass state and
/// register allocator from scratch — but is marked `!Send + !Sync` via a
/// raw-pointer `PhantomData` anyway, so a caller cannot accidentally smuggle
/// one across a thread boundary and rely on undocumented behavior.
pub struct ForgeEngine {
    config: CompilerConfig,
    optimizer: Optimizer,
    _not_send_or_sync: PhantomData<*const ()>,
}

impl ForgeEngine {
    /// Construct an engine, bootstrapping the process-wide backend registry
    /// (`spec.md` §4.7) if this is the first engine in the process.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        Runtime::bootstrap();
        let optimizer = Optimizer::new(config.optimizer_config());
        Ok(Self {
            config,
            optimizer,
            _not_send_or_sync: PhantomData,
        })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Run the optimizer pipeline and compile the result with the
    /// configured backend, returning a [`CompiledProgram`] bundling the
    /// kernel with the buffer-sizing metadata and the original→optimized
    /// node-id mapping `spec.md` §4.5 lists.
    #[instrument(skip(self, graph))]
    pub fn compile(&self, graph: &Graph) -> Result<CompiledProgram> {
        if self.config.validate_graph {
            graph.validate()?;
        }

        let (optimized, mapping) = self.optimizer.optimize_with_mapping(graph)?;

        let backend_name = self.config.resolve_instruction_set_name();
        let isa = Runtime::resolve(&backend_name)?;

        let kernel = forge_backend::ExecutableKernel::compile_default(&optimized, isa.as_ref())?;

        let highest_node_id = optimized.len().saturating_sub(1) as u32;
        let working_node_count = optimized.nodes.iter().filter(|n| !n.is_dead()).count();

        info!(
            backend = kernel.backend_name,
            nodes = kernel.node_count,
            working_node_count,
            "forge: compilation complete"
        );

        Ok(CompiledProgram {
            kernel,
            mapping,
            outputs: optimized.outputs.clone(),
            highest_node_id,
            optimized_node_count: optimized.len(),
            working_node_count,
        })
    }
}

/// A compiled kernel plus everything a caller needs to size buffers and
/// translate node ids across optimization (`spec.md` §4.5's metadata list).
pub struct CompiledProgram {
    kernel: ExecutableKernel,
    pub mapping: NodeIdMap,
    pub outputs: Vec<NodeId>,
    pub highest_node_id: u32,
    pub optimized_node_count: usize,
    pub working_node_count: usize,
}

impl CompiledProgram {
    pub fn backend_name(&self) -> &'static str {
        self.kernel.backend_name
    }

    pub fn vector_width(&self) -> usize {
        self.kernel.vector_width
    }

    pub fn node_count(&self) -> usize {
        self.kernel.node_count
    }

    pub fn emits_gradients(&self) -> bool {
        self.kernel.emits_gradients
    }

    /// Allocate a values buffer sized for this kernel, and — iff the kernel
    /// emits gradients — a gradients buffer of the same shape (`spec.md`
    /// §4.6: "`gradients_ptr` may be null for pure-forward kernels").
    pub fn allocate_buffers(&self) -> Result<(Buffer, Option<Buffer>)> {
        let values = Buffer::new(self.kernel.node_count, self.kernel.vector_width)
            .map_err(ForgeError::Backend)?;
        let gradients = if self.kernel.emits_gradients {
            Some(
                Buffer::new(self.kernel.node_count, self.kernel.vector_width)
                    .map_err(ForgeError::Backend)?,
            )
        } else {
            None
        };
        Ok((values, gradients))
    }

    /// Invoke the compiled kernel. `gradients` must be `Some` iff
    /// [`Self::emits_gradients`] is `true` (`spec.md` §4.6's null-gradients
    /// contract).
    ///
    /// # Safety
    /// `values` (and `gradients`, if present) must each hold at least
    /// `node_count() * vector_width()` doubles — exactly what
    /// [`Self::allocate_buffers`] returns. Reentrant across threads
    /// (`spec.md` §5) provided each caller supplies its own buffers.
    pub unsafe fn call(&self, values: &mut Buffer, gradients: Option<&mut Buffer>) {
        let values_ptr = values.as_mut_ptr();
        let gradients_ptr = gradients.map(Buffer::as_mut_ptr).unwrap_or(std::ptr::null_mut());
        self.kernel.call(values_ptr, gradients_ptr, self.kernel.node_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic() -> (Graph, NodeId, NodeId) {
        let mut g = Graph::new();
        let x = g.create_input();
        g.mark_diff_input(x);
        let x2 = g.create_binary(OpCode::Mul, x, x).unwrap();
        let one = g.create_constant(1.0);
        let y = g.create_binary(OpCode::Add, x2, one).unwrap();
        g.mark_output(y);
        (g, x, y)
    }

    #[test]
    fn scenario_a_quadratic_value_and_gradient() {
        let (g, x, y) = quadratic();
        let engine = ForgeEngine::new(CompilerConfig::default()).unwrap();
        let program = engine.compile(&g).unwrap();

        let mapped_x = program.mapping.get(x).unwrap_or(x);
        let mapped_y = program.mapping.get(y).unwrap_or(y);

        let (mut values, mut gradients) = program.allocate_buffers().unwrap();
        values.set_value(mapped_x.0, program.vector_width(), 2.0);
        unsafe { program.call(&mut values, gradients.as_mut()) };

        assert_eq!(values.get_value(mapped_y.0, program.vector_width()), 5.0);
        let grad = gradients.as_ref().unwrap();
        assert_eq!(grad.get_value(mapped_x.0, program.vector_width()), 4.0);
    }

    #[test]
    fn scenario_a_zero_input() {
        let (g, x, y) = quadratic();
        let engine = ForgeEngine::new(CompilerConfig::default()).unwrap();
        let program = engine.compile(&g).unwrap();

        let mapped_x = program.mapping.get(x).unwrap_or(x);
        let mapped_y = program.mapping.get(y).unwrap_or(y);

        let (mut values, mut gradients) = program.allocate_buffers().unwrap();
        values.set_value(mapped_x.0, program.vector_width(), 0.0);
        unsafe { program.call(&mut values, gradients.as_mut()) };

        assert_eq!(values.get_value(mapped_y.0, program.vector_width()), 1.0);
        let grad = gradients.as_ref().unwrap();
        assert_eq!(grad.get_value(mapped_x.0, program.vector_width()), 0.0);
    }

    #[test]
    fn pure_forward_kernel_has_no_gradient_buffer() {
        let mut g = Graph::new();
        let x = g.create_input();
        let one = g.create_constant(1.0);
        let y = g.create_binary(OpCode::Add, x, one).unwrap();
        g.mark_output(y);

        let engine = ForgeEngine::new(CompilerConfig::default()).unwrap();
        let program = engine.compile(&g).unwrap();
        assert!(!program.emits_gradients());

        let (mut values, gradients) = program.allocate_buffers().unwrap();
        assert!(gradients.is_none());
        values.set_value(x.0, program.vector_width(), 41.0);
        unsafe { program.call(&mut values, None) };
        assert_eq!(values.get_value(y.0, program.vector_width()), 42.0);
    }

    #[test]
    fn scenario_b_stability_rewrite_changes_runtime_result() {
        let mut with_stability = Graph::new();
        let x = with_stability.create_input();
        let ex = with_stability.create_unary(OpCode::Exp, x).unwrap();
        let one = with_stability.create_constant(1.0);
        let y = with_stability.create_binary(OpCode::Div, one, ex).unwrap();
        with_stability.mark_output(y);

        let engine = ForgeEngine::new(CompilerConfig::default()).unwrap();
        let program = engine.compile(&with_stability).unwrap();
        let (mut values, _) = program.allocate_buffers().unwrap();
        values.set_value(x.0, program.vector_width(), 1000.0);
        unsafe { program.call(&mut values, None) };
        let stable = values.get_value(
            program.mapping.get(y).unwrap_or(y).0,
            program.vector_width(),
        );
        assert_eq!(stable, (-1000.0f64).exp());

        let no_stability_config = CompilerConfig {
            enable_stability: false,
            ..CompilerConfig::default()
        };
        let engine2 = ForgeEngine::new(no_stability_config).unwrap();
        let program2 = engine2.compile(&with_stability).unwrap();
        let (mut values2, _) = program2.allocate_buffers().unwrap();
        values2.set_value(x.0, program2.vector_width(), 1000.0);
        unsafe { program2.call(&mut values2, None) };
        let unstable = values2.get_value(y.0, program2.vector_width());
        assert_eq!(unstable, 0.0);
    }

    #[test]
    fn scenario_f_cross_backend_parity() {
        let mut g = Graph::new();
        let x = g.create_input();
        let y_in = g.create_input();
        let sum = g.create_binary(OpCode::Add, x, y_in).unwrap();
        let sq = g.create_binary(OpCode::Mul, sum, sum).unwrap();
        g.mark_output(sq);

        let scalar = ForgeEngine::new(CompilerConfig {
            instruction_set_name: Some("SSE2".to_string()),
            ..CompilerConfig::default()
        })
        .unwrap()
        .compile(&g)
        .unwrap();
        let vector = ForgeEngine::new(CompilerConfig {
            instruction_set_name: Some("AVX2".to_string()),
            ..CompilerConfig::default()
        })
        .unwrap()
        .compile(&g)
        .unwrap();

        let (mut sv, _) = scalar.allocate_buffers().unwrap();
        sv.set_value(x.0, scalar.vector_width(), 3.0);
        sv.set_value(y_in.0, scalar.vector_width(), 4.0);
        unsafe { scalar.call(&mut sv, None) };

        let (mut vv, _) = vector.allocate_buffers().unwrap();
        vv.set_value_at(x.0, vector.vector_width(), 0, 3.0);
        vv.set_value_at(y_in.0, vector.vector_width(), 0, 4.0);
        unsafe { vector.call(&mut vv, None) };

        let scalar_result = sv.get_value(sq.0, scalar.vector_width());
        let vector_result = vv.get_value_at(sq.0, vector.vector_width(), 0);
        assert!((scalar_result - vector_result).abs() < 1e-10);
    }
}
