use thiserror::Error;

/// Errors surfaced by the graph model and the cycle-equivalence engine.
///
/// The engine never retries; every error propagates to the caller, which
/// discards any partial output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AwaError {
    /// The input graph violates a structural requirement.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A query named a vertex or path that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The spanning tree handed to the engine is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An engine precondition was violated mid-run.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    /// Cooperative cancellation was observed between vertices.
    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AwaError>;
