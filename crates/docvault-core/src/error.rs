//! Engine error taxonomy.
//!
//! Every user-facing operation returns [`EngineError`] so the HTTP layer
//! can map failures to status codes without string matching. Storage
//! implementations use `anyhow::Result` internally; their errors surface
//! as [`EngineError::Internal`].

/// Errors produced by the ingestion coordinator, processing pipeline, and
/// query engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input (empty upload body, bad content hash, unknown mode).
    /// Rejected synchronously, never retried.
    #[error("{0}")]
    Validation(String),

    /// Unknown or deleted document, or a tenant-scope mismatch.
    #[error("{0}")]
    NotFound(String),

    /// A lifecycle transition was requested from the wrong state.
    #[error("{0}")]
    InvalidState(String),

    /// Structure extraction, embedding, or answer generation failed.
    /// Retried with backoff during ingestion; surfaced as a degraded
    /// response during queries.
    #[error("{0}")]
    ExternalService(String),

    /// Partial instant-copy or a chunk referencing a missing metadata blob.
    #[error("{0}")]
    Consistency(String),

    /// Storage or other unexpected failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Short machine-readable code used in HTTP error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "bad_request",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::ExternalService(_) => "upstream_error",
            EngineError::Consistency(_) => "consistency_error",
            EngineError::Internal(_) => "internal",
        }
    }
}
