// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Derivatives Backtest - PnL accrual and performance metrics.
//!
//! Turns a price series and a per-bar target-position signal into a raw or
//! after-fee PnL stream for futures-like contracts (VN30 index futures by
//! default), then into risk/return statistics.
//!
//! # Pipeline
//!
//! ```text
//! MarketDataProvider -> PriceSeries -> Strategy -> PositionSeries
//!     -> BacktestResult (PnL, daily PnL, capital) -> Metrics -> MetricsReport
//! ```
//!
//! # Modules
//!
//! - [`market`]: bars, positions, provider and strategy ports
//! - [`backtest`]: fee model, accrual engine, metrics, overlays, batch runs
//! - [`config`]: YAML configuration loading
//! - [`observability`]: tracing setup
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod backtest;
pub mod config;
pub mod error;
pub mod market;
pub mod observability;

pub use backtest::{
    BacktestConfig, BacktestResult, FeeParameters, Metrics, MetricsReport, PnlType,
};
pub use error::{BacktestError, ProviderError, Result};
pub use market::{Bar, Frequency, PositionSeries, PriceSeries};
