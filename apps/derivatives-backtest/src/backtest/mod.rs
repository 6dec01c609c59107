//! Backtest engine for position-signal strategies on futures contracts.
//!
//! - **Fee model**: fixed plus notional-proportional fee on every position
//!   change, with an optional overnight carry fee
//! - **Accrual**: one-bar-lagged PnL, raw or after fees, with daily
//!   aggregation in the market timezone and minimum-capital sizing
//! - **Metrics**: Sharpe, Sortino, Calmar, drawdown, VaR and win/loss stats
//! - **Overlays**: take-profit / stop-loss rewrites of discrete signals
//! - **Batch**: independent per-instrument backtests on a rayon pool
//!
//! # Example
//!
//! ```ignore
//! use derivatives_backtest::backtest::{BacktestConfig, BacktestResult, Metrics};
//! use derivatives_backtest::market::{PositionSeries, PriceSeries};
//!
//! let config = BacktestConfig::default();
//! let result = BacktestResult::new(&prices, &positions, &config)?;
//! println!("PnL: {}", result.pnl());
//!
//! let report = Metrics::new(&result, &config.metrics).report();
//! println!("{}", report.to_csv());
//! ```

mod config;
mod engine;
mod fees;
pub mod metrics;
mod overlay;
mod parallel;

pub use config::{
    BacktestConfig, BatchConfig, DEFAULT_MARKET_TIMEZONE, FeeParameters, Granularity,
    MetricsConfig, PnlType,
};
pub use engine::{BacktestResult, DailyPnl, PnlRecord};
pub use fees::FeeModel;
pub use metrics::{Metrics, MetricValue, MetricsReport, UndefinedMetric};
pub use overlay::{apply_tp_sl, apply_tp_sl_trailing};
pub use parallel::{BatchResult, JobResult, ParallelBacktester, Progress, ProgressTracker};
