use thiserror::Error;

/// Errors raised by the optimizer pipeline.
///
/// The optimizer never sees malformed IR in practice (the recorder produces
/// validated graphs), but a pass that discovers an invariant violation
/// mid-rewrite still needs somewhere to report it rather than panic. Running
/// to `max_passes` without reaching a fixpoint is not an error: the pipeline
/// simply stops and proceeds to constant cleanup (`spec.md` §4.2).
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("graph error during optimization: {0}")]
    Graph(#[from] forge_ir::GraphError),
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
