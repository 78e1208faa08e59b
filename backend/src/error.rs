//! Errors raised by code generation, register allocation, and the runtime
//! (`spec.md` §7: "no backend available", "resource exhaustion" and
//! malformed-IR conditions the backend itself can still discover while
//! lowering).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackendError>;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("unknown instruction set {0:?}; not present in the backend registry")]
    UnknownInstructionSet(String),

    #[error("backend {name} does not support opcode {op:?}")]
    UnsupportedOpCode { name: &'static str, op: forge_ir::OpCode },

    #[error("register allocation failed: no allocatable register available (all {count} are locked or blacklisted)")]
    RegisterAllocationFailed { count: usize },

    #[error("code generation failed: {0}")]
    CodeGeneration(String),

    #[error("executable page allocation failed: {0}")]
    PageAllocation(String),

    #[error("backend plugin {path} failed to load: {source}")]
    PluginLoad {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("backend plugin {path} is missing the `register_backend` export")]
    MissingPluginEntryPoint { path: String },

    #[error(
        "backend plugin {path} publishes API version {found}, core expects {expected}"
    )]
    VersionMismatch {
        path: String,
        found: u32,
        expected: u32,
    },

    #[error("graph error surfaced during codegen: {0}")]
    Graph(#[from] forge_ir::GraphError),
}
