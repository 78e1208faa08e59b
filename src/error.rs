//! The aggregated error type returned by [`crate::ForgeEngine`]'s
//! compilation entry points (`spec.md` §7).
//!
//! Malformed-IR and missing-backend errors propagate out of compilation
//! (`GraphError`, `OptimizerError`, and the subset of `BackendError` raised
//! before any code is emitted); resource exhaustion (`BackendError`'s page
//! allocation variants) is fatal for that one compilation only, never for
//! the process. Runtime numeric anomalies never appear here at all — they
//! are IEEE-754 values the caller reads back from the buffer, not errors.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForgeError>;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error(transparent)]
    Graph(#[from] forge_ir::GraphError),

    #[error(transparent)]
    Optimizer(#[from] forge_optimizer::OptimizerError),

    #[error(transparent)]
    Backend(#[from] forge_backend::BackendError),
}
