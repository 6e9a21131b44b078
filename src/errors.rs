//! errors.rs: Typed failures of the statistics engine.
//!
//! All variants are local computation failures; there is nothing to retry.
//! `InvalidGrade` is a caller defect, the rest are data-quality problems the
//! caller may degrade around (skip a category, show a placeholder, ...).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid reliability grade `{value}` (expected A, B or C)")]
    InvalidGrade { value: String },

    #[error("no evidence records supplied; a proposal needs at least one")]
    InsufficientEvidence,

    #[error("malformed evidence record `{id}`: {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("evidence for `{found}` mixed into aggregation of `{expected}`")]
    MixedEvidence { expected: String, found: String },

    #[error("invalid reference price {value}: must be finite and > 0")]
    InvalidPrice { value: f64 },
}

impl EngineError {
    /// Short stable identifier, used as the `error` field of HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidGrade { .. } => "invalid_grade",
            EngineError::InsufficientEvidence => "insufficient_evidence",
            EngineError::MalformedRecord { .. } => "malformed_record",
            EngineError::MixedEvidence { .. } => "mixed_evidence",
            EngineError::InvalidPrice { .. } => "invalid_price",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
