//! Per-bar target positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bar::PriceSeries;
use crate::error::{BacktestError, ProviderError, Result};

/// Target position decided at the close of one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    /// Timestamp of the bar the position was decided on.
    pub timestamp: DateTime<Utc>,
    /// Signed exposure in contracts (fractional sizing allowed).
    pub position: f64,
}

/// Raw tabular position record; `position` may be null and is rejected.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PositionRecord {
    timestamp: DateTime<Utc>,
    position: Option<f64>,
}

/// Validated per-bar target positions.
///
/// Every entry is present and finite. Alignment with a [`PriceSeries`] is
/// checked by [`PositionSeries::check_alignment`] when a backtest is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionSeries {
    entries: Vec<PositionEntry>,
}

impl PositionSeries {
    /// Build from parallel timestamp and position vectors.
    pub fn new(timestamps: Vec<DateTime<Utc>>, positions: Vec<f64>) -> Result<Self> {
        Self::from_optional(timestamps, positions.into_iter().map(Some).collect())
    }

    /// Build from entries that may be unfilled; any `None` is a validation error.
    pub fn from_optional(
        timestamps: Vec<DateTime<Utc>>,
        positions: Vec<Option<f64>>,
    ) -> Result<Self> {
        if timestamps.len() != positions.len() {
            return Err(BacktestError::Alignment {
                message: format!(
                    "{} timestamps but {} positions",
                    timestamps.len(),
                    positions.len()
                ),
            });
        }

        let entries = timestamps
            .into_iter()
            .zip(positions)
            .enumerate()
            .map(|(index, (timestamp, position))| {
                let position = position.ok_or(BacktestError::MissingPosition { index })?;
                if !position.is_finite() {
                    return Err(BacktestError::NonFinitePosition {
                        index,
                        value: position,
                    });
                }
                Ok(PositionEntry {
                    timestamp,
                    position,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Positions stamped with the timestamps of `prices`.
    pub fn aligned_with(prices: &PriceSeries, positions: Vec<f64>) -> Result<Self> {
        Self::new(prices.timestamps().collect(), positions)
    }

    /// Parse a JSON array of `{timestamp, position}` records.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<PositionRecord> =
            serde_json::from_str(json).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let (timestamps, positions) = records
            .into_iter()
            .map(|r| (r.timestamp, r.position))
            .unzip();
        Self::from_optional(timestamps, positions)
    }

    /// Verify same length and bar-for-bar timestamp equality with `prices`.
    pub fn check_alignment(&self, prices: &PriceSeries) -> Result<()> {
        if self.len() != prices.len() {
            return Err(BacktestError::Alignment {
                message: format!(
                    "position series length {} != price series length {}",
                    self.len(),
                    prices.len()
                ),
            });
        }

        if let Some((index, (entry, ts))) = self
            .entries
            .iter()
            .zip(prices.timestamps())
            .enumerate()
            .find(|(_, (entry, ts))| entry.timestamp != *ts)
        {
            return Err(BacktestError::Alignment {
                message: format!(
                    "timestamp mismatch at index {index}: position {} vs bar {ts}",
                    entry.timestamp
                ),
            });
        }

        Ok(())
    }

    /// All entries in order.
    #[must_use]
    pub fn entries(&self) -> &[PositionEntry] {
        &self.entries
    }

    /// Position values in order.
    pub fn values(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.entries.iter().map(|e| e.position)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the series is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest absolute exposure, 0 for an empty series.
    #[must_use]
    pub fn max_abs(&self) -> f64 {
        self.values().map(f64::abs).fold(0.0, f64::max)
    }

    /// Whether every position is one of -1, 0 or 1.
    #[must_use]
    pub fn is_discrete(&self) -> bool {
        self.values().all(|p| p == -1.0 || p == 0.0 || p == 1.0)
    }
}
