//! Risk and performance metrics over a backtest's PnL stream.

use tracing::warn;

use super::math::{
    downside_deviation, gains_and_losses, is_negligible_dispersion, max_drawdown, mean,
    mean_where, population_std, quantile, sample_std,
};
use super::types::{MetricValue, MetricsReport, UndefinedMetric};
use crate::backtest::config::{Granularity, MetricsConfig};
use crate::backtest::engine::BacktestResult;

/// Metrics calculator.
///
/// Returns are `net_pnl / capital` at bar or daily granularity. Ratio
/// metrics use `config.ratio_granularity`, win/loss counting metrics use
/// `config.count_granularity`.
#[derive(Debug, Clone)]
pub struct Metrics {
    bar_pnl: Vec<f64>,
    daily_pnl: Vec<f64>,
    capital: f64,
    total_pnl: f64,
    config: MetricsConfig,
}

impl Metrics {
    /// Metrics over a completed backtest.
    #[must_use]
    pub fn new(result: &BacktestResult, config: &MetricsConfig) -> Self {
        Self {
            bar_pnl: result.records().iter().map(|r| r.net_pnl).collect(),
            daily_pnl: result.daily_pnl().iter().map(|d| d.pnl).collect(),
            capital: result.estimate_minimum_capital(),
            total_pnl: result.pnl(),
            config: config.clone(),
        }
    }

    /// Metrics over a bare return series with a unit capital base.
    ///
    /// The series serves both granularities; currency-unit metrics are in
    /// return units.
    #[must_use]
    pub fn from_returns(returns: Vec<f64>, config: &MetricsConfig) -> Self {
        Self {
            total_pnl: returns.iter().sum(),
            daily_pnl: returns.clone(),
            bar_pnl: returns,
            capital: 1.0,
            config: config.clone(),
        }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn pnl(&self, granularity: Granularity) -> &[f64] {
        match granularity {
            Granularity::Bar => &self.bar_pnl,
            Granularity::Daily => &self.daily_pnl,
        }
    }

    fn returns(&self, granularity: Granularity) -> Result<Vec<f64>, UndefinedMetric> {
        if self.capital == 0.0 {
            return Err(UndefinedMetric::ZeroCapital);
        }
        Ok(self
            .pnl(granularity)
            .iter()
            .map(|p| p / self.capital)
            .collect())
    }

    fn excess_returns(&self) -> Result<Vec<f64>, UndefinedMetric> {
        let granularity = self.config.ratio_granularity;
        let rf = self.config.risk_free_rate / self.config.annualization(granularity);
        Ok(self
            .returns(granularity)?
            .into_iter()
            .map(|r| r - rf)
            .collect())
    }

    fn periods_per_year(&self) -> f64 {
        self.config.annualization(self.config.ratio_granularity)
    }

    /// Mean of the positive returns; 0 when there are none.
    #[must_use]
    pub fn avg_win(&self) -> MetricValue {
        self.returns(self.config.count_granularity)
            .map(|r| mean_where(&r, |v| v > 0.0))
            .into()
    }

    /// Mean of the negative returns (a negative number); 0 when there are none.
    #[must_use]
    pub fn avg_loss(&self) -> MetricValue {
        self.returns(self.config.count_granularity)
            .map(|r| mean_where(&r, |v| v < 0.0))
            .into()
    }

    /// Mean return per period.
    #[must_use]
    pub fn avg_return(&self) -> MetricValue {
        self.returns(self.config.ratio_granularity)
            .and_then(|r| mean(&r).ok_or(UndefinedMetric::InsufficientObservations))
            .into()
    }

    /// Mean return per period scaled to a year.
    #[must_use]
    pub fn annualized_return(&self) -> MetricValue {
        let ppy = self.periods_per_year();
        self.returns(self.config.ratio_granularity)
            .and_then(|r| mean(&r).ok_or(UndefinedMetric::InsufficientObservations))
            .map(|m| m * ppy)
            .into()
    }

    /// Winning periods over non-zero periods.
    #[must_use]
    pub fn win_rate(&self) -> MetricValue {
        self.returns(self.config.count_granularity)
            .and_then(|r| {
                let wins = r.iter().filter(|&&v| v > 0.0).count();
                let active = r.iter().filter(|&&v| v != 0.0).count();
                if active == 0 {
                    return Err(UndefinedMetric::NoTrades);
                }
                #[allow(clippy::cast_precision_loss)]
                Ok(wins as f64 / active as f64)
            })
            .into()
    }

    /// Annualized sample standard deviation of returns.
    #[must_use]
    pub fn volatility(&self) -> MetricValue {
        let ppy = self.periods_per_year();
        self.returns(self.config.ratio_granularity)
            .and_then(|r| sample_std(&r).ok_or(UndefinedMetric::InsufficientObservations))
            .map(|s| s * ppy.sqrt())
            .into()
    }

    /// Largest peak-to-trough fall of the balance, in currency.
    #[must_use]
    pub fn max_drawdown_amount(&self) -> f64 {
        max_drawdown(self.pnl(self.config.ratio_granularity))
    }

    /// Largest peak-to-trough fall as a fraction of capital.
    #[must_use]
    pub fn max_drawdown(&self) -> MetricValue {
        if self.capital == 0.0 {
            return MetricValue::nan(UndefinedMetric::ZeroCapital);
        }
        MetricValue::defined(self.max_drawdown_amount() / self.capital)
    }

    /// Annualized mean excess return over its population standard deviation.
    #[must_use]
    pub fn sharpe(&self) -> MetricValue {
        let ppy = self.periods_per_year();
        self.excess_returns()
            .and_then(|r| {
                let avg = mean(&r).ok_or(UndefinedMetric::InsufficientObservations)?;
                let std = population_std(&r).ok_or(UndefinedMetric::InsufficientObservations)?;
                if is_negligible_dispersion(std, &r) {
                    return Err(UndefinedMetric::ZeroVariance);
                }
                Ok(avg / std * ppy.sqrt())
            })
            .into()
    }

    /// Annualized mean excess return over the downside deviation.
    ///
    /// `+inf` when the mean is positive and nothing fell below the target.
    #[must_use]
    pub fn sortino(&self) -> MetricValue {
        let excess = match self.excess_returns() {
            Ok(r) => r,
            Err(reason) => return MetricValue::nan(reason),
        };
        let (Some(avg), Some(dd)) = (mean(&excess), downside_deviation(&excess)) else {
            return MetricValue::nan(UndefinedMetric::InsufficientObservations);
        };

        if is_negligible_dispersion(dd, &excess) {
            let value = if avg > 0.0 { f64::INFINITY } else { f64::NAN };
            return MetricValue::flagged(value, UndefinedMetric::ZeroDownsideDeviation);
        }
        MetricValue::defined(avg / dd * self.periods_per_year().sqrt())
    }

    /// Annualized return over the drawdown fraction.
    #[must_use]
    pub fn calmar(&self) -> MetricValue {
        let annualized = self.annualized_return();
        if !annualized.is_defined() {
            return annualized;
        }
        let drawdown = self.max_drawdown();
        if !drawdown.is_defined() {
            return drawdown;
        }
        if drawdown.value == 0.0 {
            return MetricValue::nan(UndefinedMetric::ZeroDrawdown);
        }
        MetricValue::defined(annualized.value / drawdown.value)
    }

    /// Gross gains over gross losses.
    ///
    /// `+inf` with only gains, `NaN` when neither occurred.
    #[must_use]
    pub fn profit_factor(&self) -> MetricValue {
        let returns = match self.returns(self.config.count_granularity) {
            Ok(r) => r,
            Err(reason) => return MetricValue::nan(reason),
        };
        let (gain, loss) = gains_and_losses(&returns);
        if loss == 0.0 {
            return if gain > 0.0 {
                MetricValue::flagged(f64::INFINITY, UndefinedMetric::NoLosses)
            } else {
                MetricValue::nan(UndefinedMetric::NoTrades)
            };
        }
        MetricValue::defined(gain / loss.abs())
    }

    /// Gambler's-ruin probability for an even-money game at the observed
    /// win rate, with capital measured in average losses.
    ///
    /// `((1 - edge) / (1 + edge)) ^ (capital / |avg_loss|)` with
    /// `edge = 2 * win_rate - 1`, capped at 1.
    #[must_use]
    pub fn risk_of_ruin(&self) -> MetricValue {
        let win_rate = self.win_rate();
        if !win_rate.is_defined() {
            return win_rate;
        }
        let avg_loss = self.avg_loss();
        if !avg_loss.is_defined() {
            return avg_loss;
        }
        if avg_loss.value == 0.0 {
            return MetricValue::nan(UndefinedMetric::NoLosses);
        }

        let edge = 2.0f64.mul_add(win_rate.value, -1.0);
        // avg_loss is already a fraction of capital
        let capital_units = 1.0 / avg_loss.value.abs();
        let ruin = ((1.0 - edge) / (1.0 + edge)).powf(capital_units);
        MetricValue::defined(ruin.min(1.0))
    }

    /// Loss not exceeded with probability `confidence`, as a positive
    /// fraction of capital.
    ///
    /// Empirical `(1 - confidence)` quantile with linear interpolation,
    /// negated and floored at 0.
    #[must_use]
    pub fn value_at_risk(&self, confidence: f64) -> MetricValue {
        if !(confidence > 0.0 && confidence < 1.0) {
            return MetricValue::nan(UndefinedMetric::InvalidConfidence);
        }
        self.returns(self.config.ratio_granularity)
            .and_then(|r| {
                quantile(&r, 1.0 - confidence).ok_or(UndefinedMetric::InsufficientObservations)
            })
            .map(|q| (-q).max(0.0))
            .into()
    }

    /// Mean winning day in currency; 0 when there are none.
    #[must_use]
    pub fn avg_win_pnl(&self) -> f64 {
        mean_where(&self.daily_pnl, |v| v > 0.0)
    }

    /// Mean losing day in currency (a negative number); 0 when there are none.
    #[must_use]
    pub fn avg_loss_pnl(&self) -> f64 {
        mean_where(&self.daily_pnl, |v| v < 0.0)
    }

    /// Mean daily PnL in currency.
    #[must_use]
    pub fn avg_return_pnl(&self) -> MetricValue {
        mean(&self.daily_pnl)
            .ok_or(UndefinedMetric::InsufficientObservations)
            .into()
    }

    /// Final PnL over capital.
    #[must_use]
    pub fn return_on_capital(&self) -> MetricValue {
        if self.capital == 0.0 {
            return MetricValue::nan(UndefinedMetric::ZeroCapital);
        }
        MetricValue::defined(self.total_pnl / self.capital)
    }

    /// Every metric by name; VaR at the configured confidence.
    #[must_use]
    pub fn report(&self) -> MetricsReport {
        let mut report = MetricsReport::default();
        report.insert("total_pnl", MetricValue::defined(self.total_pnl));
        report.insert("minimum_capital", MetricValue::defined(self.capital));
        report.insert("return_on_capital", self.return_on_capital());
        report.insert("avg_win", self.avg_win());
        report.insert("avg_loss", self.avg_loss());
        report.insert("avg_return", self.avg_return());
        report.insert("annualized_return", self.annualized_return());
        report.insert("win_rate", self.win_rate());
        report.insert("volatility", self.volatility());
        report.insert("max_drawdown", self.max_drawdown());
        report.insert(
            "max_drawdown_amount",
            MetricValue::defined(self.max_drawdown_amount()),
        );
        report.insert("sharpe", self.sharpe());
        report.insert("sortino", self.sortino());
        report.insert("calmar", self.calmar());
        report.insert("profit_factor", self.profit_factor());
        report.insert("risk_of_ruin", self.risk_of_ruin());
        report.insert(
            "value_at_risk",
            self.value_at_risk(self.config.var_confidence),
        );
        report.insert("avg_win_pnl", MetricValue::defined(self.avg_win_pnl()));
        report.insert("avg_loss_pnl", MetricValue::defined(self.avg_loss_pnl()));
        report.insert("avg_return_pnl", self.avg_return_pnl());

        for (metric, reason) in report.undefined() {
            warn!(metric, %reason, "Metric undefined");
        }
        report
    }
}
