use thiserror::Error;

/// Validation and contract errors exposed by `glucotick-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be positive")]
    NonPositiveValue { field: &'static str },

    #[error("timestamp must be RFC3339 or epoch milliseconds: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("invalid provider '{value}', expected one of nightscout, librelink")]
    InvalidProvider { value: String },
    #[error("invalid units '{value}', expected one of mg/dL, mmol/L")]
    InvalidUnits { value: String },

    #[error("threshold low ({low}) must be below high ({high})")]
    InvertedThresholds { low: u32, high: u32 },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no configuration directory could be resolved for this platform")]
    NoProjectDirs,

    #[error("config key '{key}' does not address a settings field")]
    UnknownConfigKey { key: String },
}
