use thiserror::Error;

/// Validation errors raised by domain constructors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("symbol cannot be empty")]
    EmptySymbol,
    #[error("symbol length {len} exceeds max {max}")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol must start with an ASCII letter: '{ch}'")]
    SymbolInvalidStart { ch: char },
    #[error("symbol contains invalid character '{ch}' at index {index}")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("currency must be a 3-letter uppercase ISO code: '{value}'")]
    InvalidCurrency { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("bar high must be >= low")]
    InvalidBarRange,
    #[error("bar open/close must be within high/low range")]
    InvalidBarBounds,

    #[error("indicator period must be at least 1")]
    InvalidIndicatorPeriod,
}

/// Configuration errors raised by [`crate::config`] validation and env parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("field '{field}' must be greater than zero")]
    NonPositive { field: &'static str },
    #[error("rate bounds are inconsistent: min {min} <= initial {initial} <= max {max} does not hold")]
    InvalidRateBounds { min: f64, initial: f64, max: f64 },
    #[error("adjustment_factor must be within (0, 1): {value}")]
    InvalidAdjustmentFactor { value: f64 },
    #[error("environment variable '{name}' has invalid value '{value}'")]
    InvalidEnvValue { name: String, value: String },
}

/// Top-level error type for data-access operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AccessError {
    #[error("fetch failed for '{key}': {message}")]
    Fetch { key: String, message: String },

    #[error("provider is rate limited: {0}")]
    RateLimited(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AccessError {
    pub fn fetch(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            key: key.into(),
            message: message.into(),
        }
    }
}
