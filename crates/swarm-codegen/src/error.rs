//! Errors raised while lowering or rebuilding instruction streams.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodegenError {
    /// A node the frontend or an earlier stage should have resolved reached
    /// lowering (e.g. an uninitialized declaration outside a type body).
    #[error("unresolved node reached lowering: {0}")]
    UnresolvedNode(String),

    /// A symbol, type, or constructor binding the analysis stages should
    /// have attached is missing.
    #[error("missing analysis result: {0}")]
    MissingAnalysis(String),

    /// The expression protocol was violated: a walker needed a result
    /// location but the preceding instruction was not an assignment.
    #[error("no result location exposed at instruction {at}")]
    NoResultLocation { at: usize },

    #[error(transparent)]
    Isa(#[from] swarm_isa::IsaError),
}
