//! Backtest configuration types.

use std::fmt;
use std::str::FromStr;

use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::metrics::DEFAULT_VAR_CONFIDENCE;
use crate::error::BacktestError;

/// Default market timezone (HOSE / HNX derivatives).
pub const DEFAULT_MARKET_TIMEZONE: &str = "Asia/Ho_Chi_Minh";

/// PnL accrual mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PnlType {
    /// Price moves only, no fees.
    Raw,
    /// Price moves net of fees.
    #[default]
    AfterFees,
}

impl PnlType {
    /// Config/wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::AfterFees => "after_fees",
        }
    }
}

impl fmt::Display for PnlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PnlType {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "after_fees" => Ok(Self::AfterFees),
            other => Err(BacktestError::InvalidMode(other.to_string())),
        }
    }
}

/// Fee and margin parameters for one instrument class.
///
/// Monetary amounts are in the settlement currency (VND for VN30 futures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParameters {
    /// Currency value of a one-point price move for one contract.
    pub point_value: Decimal,
    /// Fixed fee per contract traded.
    pub fixed_fee_per_contract: Decimal,
    /// Fee as a fraction of traded notional (`price * point_value`).
    pub variable_fee_rate: Decimal,
    /// Margin requirement per contract, as a multiple of `point_value`.
    pub margin_rate: Decimal,
    /// Carry fee per contract held across a trading-day boundary.
    #[serde(default)]
    pub overnight_fee_per_contract: Decimal,
}

impl FeeParameters {
    /// VN30 index future: 100,000 VND per point, 2,700 VND per contract
    /// traded, 2,550 VND per contract held overnight.
    #[must_use]
    pub fn vn30_futures() -> Self {
        Self {
            point_value: dec!(100000),
            fixed_fee_per_contract: dec!(2700),
            variable_fee_rate: Decimal::ZERO,
            margin_rate: dec!(0.17),
            overnight_fee_per_contract: dec!(2550),
        }
    }

    /// Parameters with only a point value; every fee and the margin are zero.
    #[must_use]
    pub const fn frictionless(point_value: Decimal) -> Self {
        Self {
            point_value,
            fixed_fee_per_contract: Decimal::ZERO,
            variable_fee_rate: Decimal::ZERO,
            margin_rate: Decimal::ZERO,
            overnight_fee_per_contract: Decimal::ZERO,
        }
    }
}

impl Default for FeeParameters {
    fn default() -> Self {
        Self::vn30_futures()
    }
}

/// Return-series granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One observation per bar.
    Bar,
    /// One observation per market-local trading day.
    Daily,
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Annual risk-free rate, spread evenly across periods.
    pub risk_free_rate: f64,
    /// Daily observations per year.
    pub periods_per_year: f64,
    /// Bar observations per year (depends on bar frequency).
    pub bars_per_year: f64,
    /// Default VaR confidence level.
    pub var_confidence: f64,
    /// Granularity for ratio metrics (volatility, Sharpe, Sortino, Calmar, drawdown, VaR).
    pub ratio_granularity: Granularity,
    /// Granularity for win/loss counting metrics.
    pub count_granularity: Granularity,
}

impl MetricsConfig {
    /// Observations per year for `granularity`.
    #[must_use]
    pub const fn annualization(&self, granularity: Granularity) -> f64 {
        match granularity {
            Granularity::Bar => self.bars_per_year,
            Granularity::Daily => self.periods_per_year,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            periods_per_year: 252.0,
            bars_per_year: 252.0,
            var_confidence: DEFAULT_VAR_CONFIDENCE,
            ratio_granularity: Granularity::Daily,
            count_granularity: Granularity::Bar,
        }
    }
}

/// Batch evaluation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum worker threads (0 = rayon default).
    pub max_threads: usize,
    /// Jobs below this count run sequentially.
    pub min_parallel_jobs: usize,
    /// Record failed jobs and keep going instead of stopping at the first error.
    pub continue_on_error: bool,
    /// Log progress after every completed job.
    pub track_progress: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_threads: 0,
            min_parallel_jobs: 4,
            continue_on_error: true,
            track_progress: true,
        }
    }
}

/// Complete backtest configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Fee and margin parameters.
    #[serde(default)]
    pub fees: FeeParameters,
    /// PnL accrual mode.
    #[serde(default)]
    pub pnl_type: PnlType,
    /// IANA timezone used to assign bars to trading days.
    #[serde(default = "default_market_timezone")]
    pub market_timezone: String,
    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Batch evaluation configuration.
    #[serde(default)]
    pub batch: BatchConfig,
}

fn default_market_timezone() -> String {
    DEFAULT_MARKET_TIMEZONE.to_string()
}

impl BacktestConfig {
    /// Config with the given fees and mode, everything else default.
    #[must_use]
    pub fn new(fees: FeeParameters, pnl_type: PnlType) -> Self {
        Self {
            fees,
            pnl_type,
            ..Self::default()
        }
    }

    /// Parsed market timezone.
    pub fn timezone(&self) -> Result<Tz, BacktestError> {
        self.market_timezone
            .parse::<Tz>()
            .map_err(|e| BacktestError::invalid_parameter("market_timezone", e.to_string()))
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            fees: FeeParameters::default(),
            pnl_type: PnlType::default(),
            market_timezone: default_market_timezone(),
            metrics: MetricsConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}
