//! Error types for margin and buying-power computations.

use crate::securities::SecurityType;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the margin engine.
///
/// Every variant is recoverable at the call site.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MarginError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Insufficient data for {symbol}: missing {field}")]
    InsufficientData { symbol: String, field: &'static str },

    #[error("No conversion rate known for currency {currency}")]
    CurrencyMissing { currency: String },

    #[error("Solver did not converge within {iterations} iterations")]
    NumericNonConvergence { iterations: u32 },

    #[error("Unknown security: {0}")]
    UnknownSecurity(String),

    #[error("No margin model registered for {0}")]
    UnregisteredModel(SecurityType),
}

impl MarginError {
    pub(crate) fn insufficient(symbol: &str, field: &'static str) -> Self {
        MarginError::InsufficientData {
            symbol: symbol.to_string(),
            field,
        }
    }

    pub(crate) fn overflow(context: &str) -> Self {
        MarginError::Configuration(format!("{context} overflows the decimal range"))
    }
}

/// Result type alias for margin operations.
pub type Result<T> = std::result::Result<T, MarginError>;
