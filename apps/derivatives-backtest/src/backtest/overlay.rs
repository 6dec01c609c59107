//! Take-profit / stop-loss overlays on a discrete position series.
//!
//! Both overlays rewrite a -1/0/1 series bar by bar. A holding window opens
//! whenever the signal changes to a non-zero direction and records the
//! entry close. Once the unrealized move reaches `tp_pct` the position is
//! held for one more bar and then flattened. A forced exit lasts one bar:
//! if the signal still points the same way, the next bar opens a new window.

use crate::error::{BacktestError, Result};
use crate::market::{PositionSeries, PriceSeries};

/// Direction of an open holding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Long,
    Short,
}

impl Direction {
    fn from_position(position: f64) -> Option<Self> {
        if position > 0.0 {
            Some(Self::Long)
        } else if position < 0.0 {
            Some(Self::Short)
        } else {
            None
        }
    }

    /// Unrealized move from `entry` to `price`, in percent.
    fn pnl_pct(self, entry: f64, price: f64) -> f64 {
        match self {
            Self::Long => (price - entry) / entry * 100.0,
            Self::Short => (entry - price) / entry * 100.0,
        }
    }

    /// Stop level `sl_pct` percent against `reference`.
    fn stop_level(self, reference: f64, sl_pct: f64) -> f64 {
        match self {
            Self::Long => reference * (1.0 - sl_pct / 100.0),
            Self::Short => reference * (1.0 + sl_pct / 100.0),
        }
    }

    fn is_stopped(self, price: f64, stop: f64) -> bool {
        match self {
            Self::Long => price <= stop,
            Self::Short => price >= stop,
        }
    }

    fn improves(self, price: f64, best: f64) -> bool {
        match self {
            Self::Long => price > best,
            Self::Short => price < best,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopRule {
    /// Stop at `-sl_pct` from entry.
    Fixed,
    /// Stop trails the best close since entry.
    Trailing,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    direction: Direction,
    entry: f64,
    best: f64,
    stop: f64,
    target_reached: bool,
}

/// Flatten on take-profit (one bar late) or on a fixed stop-loss.
///
/// `tp_pct` and `sl_pct` are percentages of the entry close.
///
/// # Errors
///
/// - `Alignment` if the series do not line up
/// - `NonDiscretePosition` if a position is not -1, 0 or 1
/// - `InvalidParameter` if a threshold is negative or not finite
pub fn apply_tp_sl(
    prices: &PriceSeries,
    positions: &PositionSeries,
    tp_pct: f64,
    sl_pct: f64,
) -> Result<PositionSeries> {
    apply(prices, positions, tp_pct, sl_pct, StopRule::Fixed)
}

/// Like [`apply_tp_sl`], with the stop trailing the best close since entry.
///
/// # Errors
///
/// Same as [`apply_tp_sl`].
pub fn apply_tp_sl_trailing(
    prices: &PriceSeries,
    positions: &PositionSeries,
    tp_pct: f64,
    sl_pct: f64,
) -> Result<PositionSeries> {
    apply(prices, positions, tp_pct, sl_pct, StopRule::Trailing)
}

fn apply(
    prices: &PriceSeries,
    positions: &PositionSeries,
    tp_pct: f64,
    sl_pct: f64,
    rule: StopRule,
) -> Result<PositionSeries> {
    for (name, value) in [("tp_pct", tp_pct), ("sl_pct", sl_pct)] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(BacktestError::invalid_parameter(
                name,
                format!("must be a non-negative percentage, got {value}"),
            ));
        }
    }
    positions.check_alignment(prices)?;
    if let Some((index, value)) = positions
        .values()
        .enumerate()
        .find(|&(_, p)| p != -1.0 && p != 0.0 && p != 1.0)
    {
        return Err(BacktestError::NonDiscretePosition { index, value });
    }

    let mut window: Option<Window> = None;
    let mut out = Vec::with_capacity(positions.len());

    for (position, close) in positions.values().zip(prices.closes()) {
        let Some(direction) = Direction::from_position(position) else {
            window = None;
            out.push(0.0);
            continue;
        };

        let Some(mut open) = window.filter(|w| w.direction == direction) else {
            window = Some(Window {
                direction,
                entry: close,
                best: close,
                stop: direction.stop_level(close, sl_pct),
                target_reached: false,
            });
            out.push(position);
            continue;
        };

        let pnl_pct = direction.pnl_pct(open.entry, close);
        let mut exit = false;

        if pnl_pct >= tp_pct {
            if open.target_reached {
                exit = true;
            } else {
                open.target_reached = true;
            }
        }

        match rule {
            StopRule::Fixed => exit |= pnl_pct <= -sl_pct,
            StopRule::Trailing => {
                if direction.is_stopped(close, open.stop) {
                    exit = true;
                } else if direction.improves(close, open.best) {
                    open.best = close;
                    open.stop = direction.stop_level(close, sl_pct);
                }
            }
        }

        if exit {
            window = None;
            out.push(0.0);
        } else {
            window = Some(open);
            out.push(position);
        }
    }

    PositionSeries::aligned_with(prices, out)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::market::Bar;

    fn prices(closes: &[f64]) -> PriceSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let minute = u32::try_from(i).unwrap() * 5;
                Bar::flat(Utc.with_ymd_and_hms(2024, 3, 1, 2, minute, 0).unwrap(), c)
            })
            .collect();
        PriceSeries::new("VN30F1M", bars).unwrap()
    }

    fn run(closes: &[f64], signal: &[f64], tp: f64, sl: f64, trailing: bool) -> Vec<f64> {
        let prices = prices(closes);
        let positions = PositionSeries::aligned_with(&prices, signal.to_vec()).unwrap();
        let result = if trailing {
            apply_tp_sl_trailing(&prices, &positions, tp, sl)
        } else {
            apply_tp_sl(&prices, &positions, tp, sl)
        };
        result.unwrap().values().collect()
    }

    #[test]
    fn test_take_profit_holds_one_extra_bar() {
        let out = run(
            &[100.0, 103.0, 104.0, 104.0, 104.0],
            &[1.0, 1.0, 1.0, 1.0, 0.0],
            2.0,
            50.0,
            false,
        );
        // target reached at bar 1, flattened at bar 2, re-entered at bar 3
        assert_eq!(out, vec![1.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_stop_loss_flattens_immediately() {
        let out = run(
            &[100.0, 99.0, 97.0, 96.0],
            &[1.0, 1.0, 1.0, 1.0],
            10.0,
            2.0,
            false,
        );
        assert_eq!(out, vec![1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_short_stop_loss() {
        let out = run(
            &[100.0, 101.0, 103.0],
            &[-1.0, -1.0, -1.0],
            10.0,
            2.0,
            false,
        );
        assert_eq!(out, vec![-1.0, -1.0, 0.0]);
    }

    #[test]
    fn test_direction_change_opens_new_window() {
        let out = run(
            &[100.0, 99.0, 98.5, 98.0],
            &[1.0, -1.0, -1.0, -1.0],
            10.0,
            1.5,
            false,
        );
        assert_eq!(out, vec![1.0, -1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_trailing_stop_follows_best_close() {
        // best close 110 puts the stop at 104.5; 106 holds, 104 exits
        let out = run(
            &[100.0, 110.0, 106.0, 104.0],
            &[1.0, 1.0, 1.0, 1.0],
            50.0,
            5.0,
            true,
        );
        assert_eq!(out, vec![1.0, 1.0, 1.0, 0.0]);

        let fixed = run(
            &[100.0, 110.0, 106.0, 104.0],
            &[1.0, 1.0, 1.0, 1.0],
            50.0,
            5.0,
            false,
        );
        assert_eq!(fixed, vec![1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rejects_sized_positions() {
        let prices = prices(&[100.0, 101.0]);
        let positions = PositionSeries::aligned_with(&prices, vec![1.0, 2.0]).unwrap();
        let err = apply_tp_sl(&prices, &positions, 1.0, 1.0).unwrap_err();
        assert_eq!(
            err,
            BacktestError::NonDiscretePosition {
                index: 1,
                value: 2.0
            }
        );
        assert!(err.is_validation());
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let prices = prices(&[100.0]);
        let positions = PositionSeries::aligned_with(&prices, vec![1.0]).unwrap();
        assert!(matches!(
            apply_tp_sl(&prices, &positions, -1.0, 1.0),
            Err(BacktestError::InvalidParameter { .. })
        ));
    }
}
