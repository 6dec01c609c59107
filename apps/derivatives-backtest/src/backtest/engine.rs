//! PnL accrual over a price series and a target-position series.
//!
//! Position decided at the close of bar `i-1` earns the price move from
//! `close[i-1]` to `close[i]`. The position before the first bar is flat, so
//! entering at bar 0 pays its fee at bar 0 and earns nothing until bar 1.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::{BacktestConfig, PnlType};
use super::fees::FeeModel;
use crate::error::{BacktestError, Result};
use crate::market::{PositionSeries, PriceSeries};

/// Accrual for one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PnlRecord {
    /// Bar timestamp.
    pub timestamp: DateTime<Utc>,
    /// Target position decided at this bar's close.
    pub position: f64,
    /// `close[i] - close[i-1]`, 0 for the first bar.
    pub price_change: f64,
    /// Price PnL of the position carried into this bar.
    pub raw_pnl: f64,
    /// Fees charged at this bar (0 in raw mode).
    pub fee: f64,
    /// `raw_pnl - fee`.
    pub net_pnl: f64,
    /// Cumulative `net_pnl` through this bar.
    pub running_balance: f64,
}

/// Accrual for one market-local trading day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyPnl {
    /// Local calendar date.
    pub date: NaiveDate,
    /// Sum of the day's `net_pnl`.
    pub pnl: f64,
    /// Running balance at the day's last bar.
    pub balance: f64,
    /// Number of bars in the day.
    pub bars: usize,
}

/// Completed backtest for one instrument.
///
/// Immutable once built; metrics borrow it read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    instrument_id: String,
    pnl_type: PnlType,
    records: Vec<PnlRecord>,
    daily: Vec<DailyPnl>,
    minimum_capital: f64,
}

impl BacktestResult {
    /// Run the accrual.
    ///
    /// # Errors
    ///
    /// - `Alignment` if the series differ in length or timestamps
    /// - `InsufficientData` if the series are empty
    /// - `InvalidParameter` for bad fee parameters or an unknown timezone
    /// - `InvalidBar` if a bar's price or position change is too large for
    ///   fixed-point fee arithmetic
    pub fn new(
        prices: &PriceSeries,
        positions: &PositionSeries,
        config: &BacktestConfig,
    ) -> Result<Self> {
        positions.check_alignment(prices)?;
        if prices.is_empty() {
            return Err(BacktestError::InsufficientData(format!(
                "{} has no bars",
                prices.instrument_id()
            )));
        }

        let fees = FeeModel::new(config.fees.clone())?;
        let tz = config.timezone()?;
        let charge_fees = config.pnl_type == PnlType::AfterFees;

        let mut records = Vec::with_capacity(prices.len());
        let mut balance = 0.0;
        let mut prev_close: Option<f64> = None;
        let mut prev_position = 0.0;
        let mut prev_date: Option<NaiveDate> = None;

        for (index, (bar, position)) in
            prices.bars().iter().zip(positions.values()).enumerate()
        {
            let date = local_date(bar.timestamp, tz);
            let price_change = prev_close.map_or(0.0, |c| bar.close - c);
            let raw_pnl = prev_position * price_change * fees.point_value();

            let fee = if charge_fees {
                let mut fee = fees
                    .fee(prev_position, position, bar.close)
                    .map_err(|e| at_bar(index, e))?;
                if prev_date.is_some_and(|d| d != date) {
                    fee += fees
                        .overnight_fee(prev_position)
                        .map_err(|e| at_bar(index, e))?;
                }
                fee
            } else {
                0.0
            };

            let net_pnl = raw_pnl - fee;
            balance += net_pnl;
            records.push(PnlRecord {
                timestamp: bar.timestamp,
                position,
                price_change,
                raw_pnl,
                fee,
                net_pnl,
                running_balance: balance,
            });

            prev_close = Some(bar.close);
            prev_position = position;
            prev_date = Some(date);
        }

        let daily = aggregate_daily(&records, tz);
        let min_balance = records
            .iter()
            .map(|r| r.running_balance)
            .fold(0.0, f64::min);
        let minimum_capital = fees.margin_floor(positions.max_abs()) + (-min_balance).max(0.0);

        let result = Self {
            instrument_id: prices.instrument_id().to_string(),
            pnl_type: config.pnl_type,
            records,
            daily,
            minimum_capital,
        };

        debug!(
            instrument = %result.instrument_id,
            total_fees = result.total_fees(),
            "Fees charged"
        );
        info!(
            instrument = %result.instrument_id,
            pnl_type = %result.pnl_type,
            bars = result.records.len(),
            days = result.daily.len(),
            pnl = result.pnl(),
            capital = result.minimum_capital,
            "Backtest complete"
        );

        Ok(result)
    }

    /// Instrument the backtest ran on.
    #[must_use]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    /// Accrual mode.
    #[must_use]
    pub const fn pnl_type(&self) -> PnlType {
        self.pnl_type
    }

    /// Per-bar records.
    #[must_use]
    pub fn records(&self) -> &[PnlRecord] {
        &self.records
    }

    /// Final running balance.
    #[must_use]
    pub fn pnl(&self) -> f64 {
        self.records.last().map_or(0.0, |r| r.running_balance)
    }

    /// Total fees charged.
    #[must_use]
    pub fn total_fees(&self) -> f64 {
        self.records.iter().map(|r| r.fee).sum()
    }

    /// Per-day aggregates in date order.
    #[must_use]
    pub fn daily_pnl(&self) -> &[DailyPnl] {
        &self.daily
    }

    /// Day-end cumulative balance, one point per trading day.
    pub fn daily_cumulative_pnl(&self) -> impl ExactSizeIterator<Item = (NaiveDate, f64)> + '_ {
        self.daily.iter().map(|d| (d.date, d.balance))
    }

    /// Margin for the largest exposure plus the deepest running loss.
    #[must_use]
    pub const fn estimate_minimum_capital(&self) -> f64 {
        self.minimum_capital
    }

    /// Final PnL as a fraction of the minimum capital.
    ///
    /// # Errors
    ///
    /// Returns `DivisionUndefined` if the capital estimate is 0.
    pub fn pnl_percentage(&self) -> Result<f64> {
        Ok(self.pnl() / self.nonzero_capital()?)
    }

    /// Per-bar `net_pnl / capital`.
    ///
    /// # Errors
    ///
    /// Returns `DivisionUndefined` if the capital estimate is 0.
    pub fn bar_returns(&self) -> Result<Vec<f64>> {
        let capital = self.nonzero_capital()?;
        Ok(self.records.iter().map(|r| r.net_pnl / capital).collect())
    }

    /// Per-day `pnl / capital`.
    ///
    /// # Errors
    ///
    /// Returns `DivisionUndefined` if the capital estimate is 0.
    pub fn daily_returns(&self) -> Result<Vec<f64>> {
        let capital = self.nonzero_capital()?;
        Ok(self.daily.iter().map(|d| d.pnl / capital).collect())
    }

    fn nonzero_capital(&self) -> Result<f64> {
        if self.minimum_capital == 0.0 {
            return Err(BacktestError::DivisionUndefined(format!(
                "minimum capital for {} is 0",
                self.instrument_id
            )));
        }
        Ok(self.minimum_capital)
    }

    /// Per-bar records as CSV with a header row.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out =
            String::from("timestamp,position,price_change,raw_pnl,fee,net_pnl,running_balance\n");
        for r in &self.records {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{},{}",
                r.timestamp.to_rfc3339(),
                r.position,
                r.price_change,
                r.raw_pnl,
                r.fee,
                r.net_pnl,
                r.running_balance
            );
        }
        out
    }
}

/// Fee parameters are validated when the model is built, so a fee failure
/// inside the loop comes from the bar's price or position.
fn at_bar(index: usize, err: BacktestError) -> BacktestError {
    match err {
        BacktestError::InvalidParameter { name, reason } => BacktestError::InvalidBar {
            index,
            reason: format!("{name}: {reason}"),
        },
        other => other,
    }
}

fn local_date(timestamp: DateTime<Utc>, tz: Tz) -> NaiveDate {
    timestamp.with_timezone(&tz).date_naive()
}

fn aggregate_daily(records: &[PnlRecord], tz: Tz) -> Vec<DailyPnl> {
    let mut daily: Vec<DailyPnl> = Vec::new();
    for record in records {
        let date = local_date(record.timestamp, tz);
        match daily.last_mut() {
            Some(day) if day.date == date => {
                day.pnl += record.net_pnl;
                day.balance = record.running_balance;
                day.bars += 1;
            }
            _ => daily.push(DailyPnl {
                date,
                pnl: record.net_pnl,
                balance: record.running_balance,
                bars: 1,
            }),
        }
    }

    for day in &daily {
        debug!(date = %day.date, pnl = day.pnl, bars = day.bars, "Daily PnL");
    }
    daily
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::backtest::config::FeeParameters;
    use crate::market::Bar;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn series(closes: &[(DateTime<Utc>, f64)]) -> PriceSeries {
        PriceSeries::new(
            "VN30F1M",
            closes.iter().map(|&(t, c)| Bar::flat(t, c)).collect(),
        )
        .unwrap()
    }

    fn unit_config(pnl_type: PnlType) -> BacktestConfig {
        BacktestConfig::new(FeeParameters::frictionless(Decimal::ONE), pnl_type)
    }

    #[test]
    fn test_one_bar_lag() {
        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 110.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![1.0, 1.0]).unwrap();
        let result = BacktestResult::new(&prices, &positions, &unit_config(PnlType::Raw)).unwrap();

        assert_eq!(result.pnl(), 10.0);
        assert_eq!(result.records()[0].raw_pnl, 0.0);
        assert_eq!(result.records()[1].raw_pnl, 10.0);
    }

    #[test]
    fn test_signal_on_last_bar_earns_nothing() {
        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 110.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![0.0, 1.0]).unwrap();
        let result = BacktestResult::new(&prices, &positions, &unit_config(PnlType::Raw)).unwrap();
        assert_eq!(result.pnl(), 0.0);
    }

    #[test]
    fn test_after_fees_entry_fee_at_first_bar() {
        let prices = series(&[(ts(1, 2), 1250.0), (ts(1, 3), 1252.0), (ts(1, 4), 1251.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![1.0, -1.0, 0.0]).unwrap();
        let config = BacktestConfig::default();
        let result = BacktestResult::new(&prices, &positions, &config).unwrap();

        let fees: Vec<f64> = result.records().iter().map(|r| r.fee).collect();
        assert_eq!(fees, vec![2700.0, 5400.0, 2700.0]);
        // +2 points long, +1 point short, at 100k per point
        assert_eq!(result.pnl(), 300_000.0 - 10_800.0);
    }

    #[test]
    fn test_raw_mode_charges_nothing() {
        let prices = series(&[(ts(1, 2), 1250.0), (ts(1, 3), 1252.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![1.0, 0.0]).unwrap();
        let config = BacktestConfig::new(FeeParameters::vn30_futures(), PnlType::Raw);
        let result = BacktestResult::new(&prices, &positions, &config).unwrap();
        assert_eq!(result.total_fees(), 0.0);
        assert_eq!(result.pnl(), 200_000.0);
    }

    #[test]
    fn test_overnight_fee_on_day_boundary() {
        // 02:00 UTC and 07:00 UTC are both the same Hanoi day; next bar is the next day.
        let prices = series(&[(ts(1, 2), 1250.0), (ts(1, 7), 1250.0), (ts(2, 2), 1250.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![-2.0, -2.0, -2.0]).unwrap();
        let result = BacktestResult::new(&prices, &positions, &BacktestConfig::default()).unwrap();

        let fees: Vec<f64> = result.records().iter().map(|r| r.fee).collect();
        assert_eq!(fees, vec![5400.0, 0.0, 5100.0]);
    }

    #[test]
    fn test_daily_grouping_uses_market_timezone() {
        // 18:00 UTC on the 1st is 01:00 on the 2nd in Hanoi.
        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 18), 101.0), (ts(2, 2), 103.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![1.0, 1.0, 1.0]).unwrap();
        let result = BacktestResult::new(&prices, &positions, &unit_config(PnlType::Raw)).unwrap();

        let daily = result.daily_pnl();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].pnl, 0.0);
        assert_eq!(daily[1].pnl, 3.0);
        assert_eq!(daily[1].bars, 2);

        let utc = BacktestConfig {
            market_timezone: "UTC".to_string(),
            ..unit_config(PnlType::Raw)
        };
        let result = BacktestResult::new(&prices, &positions, &utc).unwrap();
        assert_eq!(result.daily_pnl().len(), 2);
        assert_eq!(result.daily_pnl()[0].pnl, 1.0);
    }

    #[test]
    fn test_minimum_capital() {
        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 95.0), (ts(1, 4), 97.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![2.0, 2.0, 0.0]).unwrap();
        let config = BacktestConfig::new(
            FeeParameters {
                margin_rate: dec!(0.5),
                ..FeeParameters::frictionless(Decimal::ONE)
            },
            PnlType::Raw,
        );
        let result = BacktestResult::new(&prices, &positions, &config).unwrap();

        // margin 0.5 * 1 * 2 plus the -10 trough
        assert_eq!(result.estimate_minimum_capital(), 11.0);
        assert!((result.pnl_percentage().unwrap() - (-6.0 / 11.0)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_capital_percentage_undefined() {
        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 101.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![0.0, 0.0]).unwrap();
        let result = BacktestResult::new(&prices, &positions, &unit_config(PnlType::Raw)).unwrap();

        assert_eq!(result.estimate_minimum_capital(), 0.0);
        assert!(matches!(
            result.pnl_percentage(),
            Err(BacktestError::DivisionUndefined(_))
        ));
        assert!(result.bar_returns().is_err());
    }

    #[test]
    fn test_empty_series_rejected() {
        let prices = PriceSeries::new("VN30F1M", Vec::new()).unwrap();
        let positions = PositionSeries::new(Vec::new(), Vec::new()).unwrap();
        assert!(matches!(
            BacktestResult::new(&prices, &positions, &BacktestConfig::default()),
            Err(BacktestError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_misaligned_rejected() {
        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 101.0)]);
        let positions = PositionSeries::new(vec![ts(1, 2)], vec![1.0]).unwrap();
        let err = BacktestResult::new(&prices, &positions, &BacktestConfig::default()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_unrepresentable_fee_input_names_the_bar() {
        let config = BacktestConfig::default();

        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 1e30)]);
        let entry = PositionSeries::aligned_with(&prices, vec![0.0, 1.0]).unwrap();
        let err = BacktestResult::new(&prices, &entry, &config).unwrap_err();
        assert!(err.is_validation());
        assert!(matches!(
            err,
            BacktestError::InvalidBar { index: 1, ref reason } if reason.starts_with("price")
        ));

        // raw mode never converts to fixed point
        let raw = BacktestConfig::new(FeeParameters::vn30_futures(), PnlType::Raw);
        assert!(BacktestResult::new(&prices, &entry, &raw).is_ok());

        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 101.0)]);
        let oversized = PositionSeries::aligned_with(&prices, vec![0.0, 1e30]).unwrap();
        let err = BacktestResult::new(&prices, &oversized, &config).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::InvalidBar { index: 1, ref reason } if reason.starts_with("position_change")
        ));
    }

    #[test]
    fn test_to_csv() {
        let prices = series(&[(ts(1, 2), 100.0), (ts(1, 3), 110.0)]);
        let positions = PositionSeries::aligned_with(&prices, vec![1.0, 1.0]).unwrap();
        let result = BacktestResult::new(&prices, &positions, &unit_config(PnlType::Raw)).unwrap();

        let csv = result.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,position"));
        assert!(lines[2].ends_with(",10,0,10,10"));
    }
}
