//! Error types for the call-analysis engine.

use crate::engine::SessionId;

/// Top-level error type for the analysis engine.
///
/// Each variant maps to exactly one wire-level status code (see
/// [`EngineError::status`]); callers that only care about the code can match
/// on that, callers that want context get the payload.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A caller-provided value is outside its documented range.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The id does not refer to a live session.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The requested master-call reference cannot be resolved.
    #[error("master call not found: {0}")]
    FileNotFound(String),

    /// The operation is well-formed but not enough audio has been processed.
    #[error("insufficient data: {0}")]
    InsufficientData(&'static str),

    /// An internal DSP step failed in a way the caller cannot correct.
    #[error("processing error: {0}")]
    ProcessingError(String),

    /// Allocation failed.
    #[error("out of memory")]
    OutOfMemory,

    /// Session or component could not complete initialization.
    #[error("initialization failed: {0}")]
    InitFailed(String),
}

impl EngineError {
    /// Wire-level status-code name for bindings and logs.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::InsufficientData(_) => "INSUFFICIENT_DATA",
            Self::ProcessingError(_) => "PROCESSING_ERROR",
            Self::OutOfMemory => "OUT_OF_MEMORY",
            Self::InitFailed(_) => "INIT_FAILED",
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
