//! Error types shared across the sketch, storage, and aggregation layers.

use thiserror::Error;

/// Errors produced anywhere in the engine.
///
/// Variants map onto the four error kinds of the compliance engine's error model:
/// malformed input (`Validation`), absent data that queries treat as empty rather
/// than failing (`NotFound`), retry-safe collaborator failures (`Transient`), and
/// programmer/invariant bugs (`Internal`).
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input: unknown window label, out-of-range precision, mismatched
    /// sketch parameters on merge, non-ISO timestamp. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// No sketch exists at the requested key. Most callers should treat this as
    /// zero/empty rather than propagating it; it exists as a distinct variant so
    /// storage-layer code can distinguish "absent" from "corrupt".
    #[error("not found: {0}")]
    NotFound(String),

    /// The KV collaborator failed in a way that is safe to retry (connection
    /// drop, command timeout, saturation).
    #[error("transient storage error: {0}")]
    Transient(String),

    /// A programmer bug or invariant violation. Always logged with full context
    /// before being surfaced.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True if a caller may reasonably retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;
