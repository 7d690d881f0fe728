//! Validation errors raised while building domain values

use thiserror::Error;

/// Result type for domain validation
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A domain value was rejected before it reached storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("template has no levels")]
    NoLevels,

    #[error("level orders must be contiguous from 1; expected {expected}, found {found}")]
    NonContiguousLevels { expected: u32, found: u32 },

    #[error("level {level}: {reason}")]
    InvalidLevel { level: u32, reason: String },

    #[error("delegator and delegate are the same user")]
    SelfDelegation,

    #[error("delegation ends before it starts")]
    InvertedDateRange,

    #[error("delegation covers no authority")]
    EmptyAuthority,

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("{field} of {hours}h exceeds the {max}h limit")]
    HoursOutOfRange {
        field: &'static str,
        hours: u32,
        max: u32,
    },

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{0}")]
    Invalid(String),
}
