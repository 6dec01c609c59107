//! OHLCV bars and validated price series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BacktestError, ProviderError, Result};

/// One OHLCV record for a fixed time interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Bar {
    /// Bar close time (UTC).
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume, if the provider reports it.
    #[serde(default)]
    pub volume: Option<f64>,
}

impl Bar {
    /// Create a new bar.
    #[must_use]
    pub const fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<f64>,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Bar with all four prices equal to `close`.
    #[must_use]
    pub const fn flat(timestamp: DateTime<Utc>, close: f64) -> Self {
        Self::new(timestamp, close, close, close, close, None)
    }

    fn check(&self, index: usize) -> Result<()> {
        let invalid = |reason: String| BacktestError::InvalidBar { index, reason };

        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(invalid(format!("{name} is not finite ({value})")));
            }
        }

        if self.high < self.open.max(self.close) {
            return Err(invalid(format!(
                "high {} below max(open, close) {}",
                self.high,
                self.open.max(self.close)
            )));
        }
        if self.low > self.open.min(self.close) {
            return Err(invalid(format!(
                "low {} above min(open, close) {}",
                self.low,
                self.open.min(self.close)
            )));
        }

        if let Some(volume) = self.volume
            && (!volume.is_finite() || volume < 0.0)
        {
            return Err(invalid(format!("volume {volume} must be finite and >= 0")));
        }

        Ok(())
    }
}

/// Ordered, validated bars for one instrument.
///
/// Immutable once built. Gaps between bars are kept as-is; the engine never
/// resamples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    instrument_id: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series, checking OHLC invariants and strictly increasing timestamps.
    pub fn new(instrument_id: impl Into<String>, bars: Vec<Bar>) -> Result<Self> {
        for (index, bar) in bars.iter().enumerate() {
            bar.check(index)?;
        }

        if let Some(index) = bars
            .windows(2)
            .position(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(BacktestError::InvalidBar {
                index: index + 1,
                reason: format!(
                    "timestamp {} does not follow {}",
                    bars[index + 1].timestamp,
                    bars[index].timestamp
                ),
            });
        }

        Ok(Self {
            instrument_id: instrument_id.into(),
            bars,
        })
    }

    /// Parse a JSON array of bar records.
    ///
    /// Each record must carry exactly `timestamp`, `open`, `high`, `low`,
    /// `close` and optionally `volume`; unknown or missing columns are rejected.
    pub fn from_json(instrument_id: impl Into<String>, json: &str) -> Result<Self> {
        let bars: Vec<Bar> =
            serde_json::from_str(json).map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Self::new(instrument_id, bars)
    }

    /// Instrument identifier.
    #[must_use]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    /// All bars in timestamp order.
    #[must_use]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Number of bars.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Whether the series has no bars.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Close prices in order.
    pub fn closes(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        self.bars.iter().map(|b| b.close)
    }

    /// Bar timestamps in order.
    pub fn timestamps(&self) -> impl ExactSizeIterator<Item = DateTime<Utc>> + '_ {
        self.bars.iter().map(|b| b.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_series() {
        let series = PriceSeries::new(
            "VN30F1M",
            vec![
                Bar::new(ts(2), 1250.0, 1255.0, 1248.0, 1252.0, Some(1_000.0)),
                Bar::new(ts(3), 1252.0, 1260.0, 1251.0, 1259.5, None),
            ],
        )
        .unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.instrument_id(), "VN30F1M");
        assert_eq!(series.closes().collect::<Vec<_>>(), vec![1252.0, 1259.5]);
    }

    #[test]
    fn test_rejects_high_below_close() {
        let err = PriceSeries::new(
            "VN30F1M",
            vec![Bar::new(ts(2), 1250.0, 1251.0, 1248.0, 1252.0, None)],
        )
        .unwrap_err();
        assert!(matches!(err, BacktestError::InvalidBar { index: 0, .. }));
    }

    #[test]
    fn test_rejects_low_above_open() {
        let err = PriceSeries::new(
            "VN30F1M",
            vec![Bar::new(ts(2), 1250.0, 1255.0, 1251.0, 1252.0, None)],
        )
        .unwrap_err();
        assert!(matches!(err, BacktestError::InvalidBar { index: 0, .. }));
    }

    #[test]
    fn test_rejects_duplicate_timestamp() {
        let err = PriceSeries::new(
            "VN30F1M",
            vec![Bar::flat(ts(2), 1250.0), Bar::flat(ts(2), 1251.0)],
        )
        .unwrap_err();
        assert!(matches!(err, BacktestError::InvalidBar { index: 1, .. }));
    }

    #[test]
    fn test_rejects_nan_close() {
        let err = PriceSeries::new("VN30F1M", vec![Bar::flat(ts(2), f64::NAN)]).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_from_json_strict_columns() {
        let ok = r#"[
            {"timestamp": "2024-03-01T02:00:00Z", "open": 1250.0, "high": 1255.0, "low": 1248.0, "close": 1252.0},
            {"timestamp": "2024-03-01T03:00:00Z", "open": 1252.0, "high": 1260.0, "low": 1251.0, "close": 1259.5, "volume": 812.0}
        ]"#;
        let series = PriceSeries::from_json("VN30F1M", ok).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.bars()[1].volume, Some(812.0));

        let extra = r#"[{"timestamp": "2024-03-01T02:00:00Z", "open": 1.0, "high": 1.0, "low": 1.0, "close": 1.0, "oi": 5}]"#;
        assert!(matches!(
            PriceSeries::from_json("VN30F1M", extra),
            Err(BacktestError::Provider(ProviderError::Malformed(_)))
        ));

        let missing = r#"[{"timestamp": "2024-03-01T02:00:00Z", "open": 1.0, "high": 1.0, "low": 1.0}]"#;
        assert!(PriceSeries::from_json("VN30F1M", missing).is_err());
    }
}
