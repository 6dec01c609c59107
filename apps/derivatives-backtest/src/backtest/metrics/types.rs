//! Metric value and report types.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

/// Why a metric has no meaningful value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedMetric {
    /// No non-zero return to count.
    NoTrades,
    /// Returns have zero dispersion.
    ZeroVariance,
    /// No return below the target.
    ZeroDownsideDeviation,
    /// The balance never fell below a previous peak.
    ZeroDrawdown,
    /// No losing period.
    NoLosses,
    /// The capital base is 0, so returns cannot be formed.
    ZeroCapital,
    /// Too few observations for the statistic.
    InsufficientObservations,
    /// Confidence level outside (0, 1).
    InvalidConfidence,
}

impl UndefinedMetric {
    /// Snake-case name used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoTrades => "no_trades",
            Self::ZeroVariance => "zero_variance",
            Self::ZeroDownsideDeviation => "zero_downside_deviation",
            Self::ZeroDrawdown => "zero_drawdown",
            Self::NoLosses => "no_losses",
            Self::ZeroCapital => "zero_capital",
            Self::InsufficientObservations => "insufficient_observations",
            Self::InvalidConfidence => "invalid_confidence",
        }
    }
}

impl fmt::Display for UndefinedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric value with an optional degeneracy flag.
///
/// Flagged values carry a sentinel: `NaN`, or `+inf` where the limit is
/// meaningful (profit factor with no losses, Sortino with no downside).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Metric value or sentinel. Non-finite values serialize as the
    /// strings `"inf"`, `"-inf"` or `"NaN"`.
    #[serde(
        serialize_with = "serialize_sentinel",
        deserialize_with = "deserialize_sentinel"
    )]
    pub value: f64,
    /// Set when `value` is a sentinel.
    pub undefined: Option<UndefinedMetric>,
}

impl MetricValue {
    /// A well-defined value.
    #[must_use]
    pub const fn defined(value: f64) -> Self {
        Self {
            value,
            undefined: None,
        }
    }

    /// A `NaN` sentinel.
    #[must_use]
    pub const fn nan(reason: UndefinedMetric) -> Self {
        Self::flagged(f64::NAN, reason)
    }

    /// An explicit sentinel such as `+inf`.
    #[must_use]
    pub const fn flagged(value: f64, reason: UndefinedMetric) -> Self {
        Self {
            value,
            undefined: Some(reason),
        }
    }

    /// Whether the value carries no degeneracy flag.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        self.undefined.is_none()
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_sentinel<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_str(&value.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SentinelRepr {
    Number(f64),
    Text(String),
}

fn deserialize_sentinel<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match SentinelRepr::deserialize(deserializer)? {
        SentinelRepr::Number(value) => Ok(value),
        SentinelRepr::Text(s) => match s.parse::<f64>() {
            Ok(value) if !value.is_finite() => Ok(value),
            _ => Err(serde::de::Error::custom(format!(
                "expected a number, \"inf\", \"-inf\" or \"NaN\", got \"{s}\""
            ))),
        },
    }
}

impl From<Result<f64, UndefinedMetric>> for MetricValue {
    fn from(result: Result<f64, UndefinedMetric>) -> Self {
        result.map_or_else(Self::nan, Self::defined)
    }
}

/// Named metric values for one backtest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Metric values keyed by name.
    pub metrics: BTreeMap<String, MetricValue>,
}

impl MetricsReport {
    /// Value for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub(crate) fn insert(&mut self, name: &str, value: MetricValue) {
        self.metrics.insert(name.to_string(), value);
    }

    /// Names of flagged metrics with their reasons.
    pub fn undefined(&self) -> impl Iterator<Item = (&str, UndefinedMetric)> {
        self.metrics
            .iter()
            .filter_map(|(name, v)| v.undefined.map(|reason| (name.as_str(), reason)))
    }

    /// `metric,value,undefined` rows with a header.
    #[must_use]
    pub fn to_csv(&self) -> String {
        let mut out = String::from("metric,value,undefined\n");
        for (name, v) in &self.metrics {
            let reason = v.undefined.map_or("", UndefinedMetric::as_str);
            let _ = writeln!(out, "{name},{},{reason}", v.value);
        }
        out
    }

    /// Pretty-printed JSON; sentinels are written as strings so the report
    /// reads back unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_value_from_result() {
        let ok: MetricValue = Ok(1.5).into();
        assert!(ok.is_defined());
        assert_eq!(ok.value, 1.5);

        let err: MetricValue = Err(UndefinedMetric::ZeroVariance).into();
        assert!(err.value.is_nan());
        assert_eq!(err.undefined, Some(UndefinedMetric::ZeroVariance));
    }

    #[test]
    fn test_report_csv_and_json() {
        let mut report = MetricsReport::default();
        report.insert("sharpe", MetricValue::defined(1.25));
        report.insert(
            "profit_factor",
            MetricValue::flagged(f64::INFINITY, UndefinedMetric::NoLosses),
        );

        let csv = report.to_csv();
        assert_eq!(
            csv,
            "metric,value,undefined\nprofit_factor,inf,no_losses\nsharpe,1.25,\n"
        );

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["metrics"]["sharpe"]["value"], 1.25);
        assert_eq!(json["metrics"]["profit_factor"]["value"], "inf");
        assert_eq!(json["metrics"]["profit_factor"]["undefined"], "no_losses");

        let flagged: Vec<_> = report.undefined().collect();
        assert_eq!(flagged, vec![("profit_factor", UndefinedMetric::NoLosses)]);
    }

    #[test]
    fn test_report_json_roundtrip_keeps_sentinels() {
        let mut report = MetricsReport::default();
        report.insert("sharpe", MetricValue::nan(UndefinedMetric::ZeroVariance));
        report.insert(
            "profit_factor",
            MetricValue::flagged(f64::INFINITY, UndefinedMetric::NoLosses),
        );
        report.insert("max_drawdown_amount", MetricValue::defined(12_500.0));

        let parsed: MetricsReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        let sharpe = parsed.get("sharpe").unwrap();
        assert!(sharpe.value.is_nan());
        assert_eq!(sharpe.undefined, Some(UndefinedMetric::ZeroVariance));
        assert_eq!(parsed.get("profit_factor").unwrap().value, f64::INFINITY);
        assert_eq!(parsed.get("max_drawdown_amount").unwrap().value, 12_500.0);
    }

    #[test]
    fn test_rejects_unknown_sentinel() {
        let err = serde_json::from_str::<MetricValue>(r#"{"value": "huge", "undefined": null}"#)
            .unwrap_err();
        assert!(err.to_string().contains("huge"));
    }
}
