//! Statistical helpers over `f64` series.

use super::constants::ZERO_TOLERANCE;

#[allow(clippy::cast_precision_loss)]
const fn len_f64(values: &[f64]) -> f64 {
    values.len() as f64
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / len_f64(values))
}

/// Sample standard deviation (n - 1); `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Some((sum_sq / (len_f64(values) - 1.0)).sqrt())
}

/// Population standard deviation (n); `None` for an empty slice.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    Some((sum_sq / len_f64(values)).sqrt())
}

/// `sqrt(mean(min(v, 0)^2))` over all values; `None` for an empty slice.
pub fn downside_deviation(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let sum_sq: f64 = values.iter().map(|v| v.min(0.0).powi(2)).sum();
    Some((sum_sq / len_f64(values)).sqrt())
}

/// Empirical quantile with linear interpolation at `q * (n - 1)`.
///
/// `None` for an empty slice or `q` outside `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q * (len_f64(&sorted) - 1.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lower = pos.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let weight = pos - pos.floor();
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Whether `dispersion` is rounding noise relative to the magnitude of `values`.
///
/// Summing `n` values of magnitude `m` carries up to `n * m * EPSILON` of
/// error, so a constant series can show a tiny non-zero spread.
pub fn is_negligible_dispersion(dispersion: f64, values: &[f64]) -> bool {
    let scale = values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    dispersion <= ZERO_TOLERANCE * scale * len_f64(values)
}

/// Largest peak-to-trough fall of the cumulative sum of `pnl`.
///
/// The balance starts at 0 before the first value, so an initial loss
/// counts as drawdown.
pub fn max_drawdown(pnl: &[f64]) -> f64 {
    let mut balance = 0.0_f64;
    let mut peak = 0.0_f64;
    let mut worst = 0.0_f64;
    for v in pnl {
        balance += v;
        peak = peak.max(balance);
        worst = worst.max(peak - balance);
    }
    worst
}

/// Sum of strictly positive values and of strictly negative values.
pub fn gains_and_losses(values: &[f64]) -> (f64, f64) {
    values.iter().fold((0.0, 0.0), |(gain, loss), &v| {
        if v > 0.0 {
            (gain + v, loss)
        } else if v < 0.0 {
            (gain, loss + v)
        } else {
            (gain, loss)
        }
    })
}

/// Mean of the values matching `pred`; 0 when none match.
pub fn mean_where(values: &[f64], pred: impl Fn(f64) -> bool) -> f64 {
    let selected: Vec<f64> = values.iter().copied().filter(|&v| pred(v)).collect();
    mean(&selected).unwrap_or(0.0)
}
