//! Formatting helpers for metric display.

use super::types::MetricValue;

/// Format a fraction as a percentage string.
#[must_use]
pub fn format_pct(value: f64) -> String {
    if value.is_finite() {
        format!("{:.2}%", value * 100.0)
    } else {
        format_non_finite(value)
    }
}

/// Format a ratio with 2 decimal places, or the degeneracy reason.
#[must_use]
pub fn format_ratio(value: &MetricValue) -> String {
    match value.undefined {
        Some(reason) if value.value.is_nan() => format!("N/A ({reason})"),
        _ if value.value.is_finite() => format!("{:.2}", value.value),
        _ => format_non_finite(value.value),
    }
}

/// Format a currency amount with thousands separators and no decimals.
#[must_use]
pub fn format_currency(value: f64) -> String {
    if !value.is_finite() {
        return format_non_finite(value);
    }
    let rounded = format!("{:.0}", value.abs());
    let mut grouped = String::with_capacity(rounded.len() + rounded.len() / 3);
    for (i, ch) in rounded.chars().enumerate() {
        if i > 0 && (rounded.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0.0 && rounded != "0" {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn format_non_finite(value: f64) -> String {
    if value.is_nan() {
        "N/A".to_string()
    } else if value > 0.0 {
        "inf".to_string()
    } else {
        "-inf".to_string()
    }
}
