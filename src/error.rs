//! Typed error taxonomy for the ingestion/query pipeline.
//!
//! The pipeline kinds named by the design (unsupported format, extraction
//! failure, embedding failure, per-store write failure, timeout, validation,
//! not-found, conflict) get concrete variants here so the orchestrator and
//! HTTP layer can match on kind. Everywhere else in the crate, `anyhow::Error`
//! remains the working error type — `FkError` is introduced only at the
//! boundaries that need to discriminate (atomicity contract, HTTP responses).

use std::fmt;

/// Which store adapter a write failure occurred against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Rv,
    Vi,
    Gr,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreKind::Rv => "rv",
            StoreKind::Vi => "vi",
            StoreKind::Gr => "gr",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FkError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("store write failed ({store}): {reason}")]
    StoreWriteFailed { store: StoreKind, reason: String },

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl FkError {
    /// HTTP status code this error kind maps to (used by `server`/`webhook`).
    pub fn status_code(&self) -> u16 {
        match self {
            FkError::ValidationError(_) => 400,
            FkError::UnsupportedFormat(_) => 400,
            FkError::NotFound(_) => 404,
            FkError::Conflict(_) => 409,
            FkError::Timeout(_) => 504,
            FkError::ExtractionFailed(_) | FkError::EmbeddingFailed(_) => 422,
            FkError::StoreWriteFailed { .. } => 500,
        }
    }

    /// Machine-readable error code, matching the HTTP error-contract shape.
    pub fn code(&self) -> &'static str {
        match self {
            FkError::UnsupportedFormat(_) => "unsupported_format",
            FkError::ExtractionFailed(_) => "extraction_failed",
            FkError::EmbeddingFailed(_) => "embedding_failed",
            FkError::StoreWriteFailed { .. } => "store_write_failed",
            FkError::Timeout(_) => "timeout",
            FkError::ValidationError(_) => "validation_error",
            FkError::NotFound(_) => "not_found",
            FkError::Conflict(_) => "conflict",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(FkError::NotFound("x".into()).status_code(), 404);
        assert_eq!(FkError::ValidationError("x".into()).status_code(), 400);
        assert_eq!(
            FkError::StoreWriteFailed {
                store: StoreKind::Vi,
                reason: "down".into()
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn store_kind_display() {
        assert_eq!(StoreKind::Rv.to_string(), "rv");
        assert_eq!(StoreKind::Gr.to_string(), "gr");
    }
}
