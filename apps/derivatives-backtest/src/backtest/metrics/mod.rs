//! Risk and performance metrics for backtest evaluation.
//!
//! Implements:
//! - Sharpe, Sortino and Calmar ratios
//! - Maximum drawdown (currency and fraction of capital)
//! - Volatility and value-at-risk
//! - Win rate, average win/loss, profit factor and risk of ruin
//!
//! Degenerate inputs never fail: a metric without a meaningful value
//! carries a sentinel and an [`UndefinedMetric`] flag.

mod calculator;
mod constants;
mod format;
mod math;
mod types;

pub use calculator::Metrics;
pub use constants::DEFAULT_VAR_CONFIDENCE;
pub use format::{format_currency, format_pct, format_ratio};
pub use types::{MetricValue, MetricsReport, UndefinedMetric};
