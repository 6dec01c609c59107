//! Numeric constants for metric calculations.

/// Per-observation relative rounding allowance for zero-dispersion checks.
pub const ZERO_TOLERANCE: f64 = f64::EPSILON;

/// Default VaR confidence level.
pub const DEFAULT_VAR_CONFIDENCE: f64 = 0.95;
