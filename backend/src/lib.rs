//! Native code generation for `forge` (`spec.md` §4.3 through §4.7, §5):
//! the `InstructionSet` backend abstraction, its SSE2/AVX2 implementations,
//! the forward/gradient emitters, the executable kernel, the aligned value
//! buffer, and the process-wide backend runtime.
//!
//! Built on `cranelift-jit`/`cranelift-codegen` rather than a hand-rolled
//! x86-64 encoder — see `DESIGN.md`'s entry for this crate and `SPEC_FULL.md`
//! §3.1 for the grounding behind that choice.

pub mod buffer;
pub mod codegen;
pub mod emitter;
pub mod error;
pub mod isa;
pub mod kernel;
pub mod register_allocator;
pub mod runtime;

pub use buffer::Buffer;
pub use emitter::{CompilationPolicy, DefaultPolicy, ForwardEmitter, GradientEmitter};
pub use error::{BackendError, Result};
pub use isa::{Avx2Backend, BackendMeta, InstructionSet, Sse2Backend};
pub use kernel::{ExecutableKernel, KernelFn};
pub use register_allocator::RegisterAllocator;
pub use runtime::{BackendRegistry, Runtime, API_VERSION};
