//! Strategy port: turns a price series into target positions.

use super::bar::PriceSeries;
use super::position::PositionSeries;
use crate::error::Result;

/// Position signal generator supplied by the caller.
///
/// Treated as an opaque oracle; its output is validated like any other
/// [`PositionSeries`] when a backtest is built.
pub trait Strategy: Send + Sync {
    /// Target position for every bar of `prices`.
    ///
    /// # Errors
    ///
    /// Returns an error if the strategy cannot produce a valid series.
    fn generate_positions(&self, prices: &PriceSeries) -> Result<PositionSeries>;
}

impl<F> Strategy for F
where
    F: Fn(&PriceSeries) -> Result<PositionSeries> + Send + Sync,
{
    fn generate_positions(&self, prices: &PriceSeries) -> Result<PositionSeries> {
        self(prices)
    }
}
