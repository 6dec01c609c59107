//! Error types for backtest construction and market data retrieval.
//!
//! Structural problems with the inputs (misaligned series, malformed bars,
//! bad fee configuration) are fatal and surface as [`BacktestError`] before
//! any result exists. Numeric degeneracy inside a single metric is not an
//! error; see [`crate::backtest::metrics::UndefinedMetric`].

use thiserror::Error;

/// Errors raised while building or querying a backtest.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BacktestError {
    /// Price and position series do not line up bar for bar.
    #[error("Alignment error: {message}")]
    Alignment {
        /// What did not line up.
        message: String,
    },

    /// A bar violates the OHLC or ordering invariants.
    #[error("Invalid bar at index {index}: {reason}")]
    InvalidBar {
        /// Index of the offending bar.
        index: usize,
        /// Violated invariant.
        reason: String,
    },

    /// A position entry was left unfilled.
    #[error("Missing position at index {index}")]
    MissingPosition {
        /// Index of the unfilled entry.
        index: usize,
    },

    /// A position value is NaN or infinite.
    #[error("Non-finite position {value} at index {index}")]
    NonFinitePosition {
        /// Index of the offending entry.
        index: usize,
        /// Offending value.
        value: f64,
    },

    /// An overlay that needs -1/0/1 positions got a sized one.
    #[error("Position {value} at index {index} is not one of -1, 0, 1")]
    NonDiscretePosition {
        /// Index of the offending entry.
        index: usize,
        /// Offending value.
        value: f64,
    },

    /// Fee or margin configuration is invalid.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unknown PnL accrual mode.
    #[error("Invalid pnl_type '{0}'. Choose 'raw' or 'after_fees'")]
    InvalidMode(String),

    /// The series is too short for the requested computation.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A ratio has a zero denominator.
    #[error("Division undefined: {0}")]
    DivisionUndefined(String),

    /// Market data retrieval failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl BacktestError {
    /// Shorthand for a [`BacktestError::InvalidParameter`].
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a validation failure of the input series.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Alignment { .. }
                | Self::InvalidBar { .. }
                | Self::MissingPosition { .. }
                | Self::NonFinitePosition { .. }
                | Self::NonDiscretePosition { .. }
        )
    }
}

/// Errors raised by a [`crate::market::MarketDataProvider`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider does not know this instrument.
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    /// The instrument exists but has no bars at this frequency.
    #[error("No data for instrument {instrument_id} at {frequency}")]
    NoData {
        /// Instrument identifier.
        instrument_id: String,
        /// Requested frequency.
        frequency: String,
    },

    /// The provider context carries no credentials.
    #[error("Missing credentials for provider {0}")]
    MissingCredentials(String),

    /// Frequency string could not be parsed.
    #[error("Unsupported frequency: {0}")]
    UnsupportedFrequency(String),

    /// Payload could not be decoded into bars.
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, BacktestError>;
