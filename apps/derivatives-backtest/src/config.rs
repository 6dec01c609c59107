//! Configuration loading for backtest runs.
//!
//! A config file is a YAML rendering of [`BacktestConfig`]; every section is
//! optional and falls back to the VN30 futures defaults.
//!
//! # Usage
//!
//! ```rust,ignore
//! use derivatives_backtest::config::load_config;
//!
//! // Load from default path (backtest.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("configs/vn30.yaml"))?;
//! println!("pnl type: {}", config.pnl_type);
//! ```
//!
//! Values may reference environment variables as `${VAR}` or
//! `${VAR:-default}`; interpolation runs before parsing.

use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::backtest::BacktestConfig;

/// Default config path used by [`load_config`].
pub const DEFAULT_CONFIG_PATH: &str = "backtest.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Load a backtest configuration from a YAML file.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to `backtest.yaml`.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<BacktestConfig, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    let config = load_config_from_string(&contents)?;
    tracing::debug!(path, pnl_type = %config.pnl_type, "Loaded backtest config");
    Ok(config)
}

/// Load a backtest configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<BacktestConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: BacktestConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

fn env_var_regex() -> Option<&'static Regex> {
    static ENV_VAR_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    ENV_VAR_REGEX
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
        .as_ref()
}

/// Replace `${VAR}` and `${VAR:-default}` with environment values.
///
/// Unset or empty variables take the default, or the empty string without one.
fn interpolate_env_vars(input: &str) -> String {
    let Some(re) = env_var_regex() else {
        return input.to_string();
    };

    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let default_value = caps.get(2).map_or("", |m| m.as_str());
        match std::env::var(&caps[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration values.
fn validate_config(config: &BacktestConfig) -> Result<(), ConfigError> {
    let fees = &config.fees;
    if fees.point_value <= Decimal::ZERO {
        return Err(validation("fees.point_value must be positive"));
    }
    for (name, value) in [
        ("fixed_fee_per_contract", fees.fixed_fee_per_contract),
        ("variable_fee_rate", fees.variable_fee_rate),
        ("margin_rate", fees.margin_rate),
        ("overnight_fee_per_contract", fees.overnight_fee_per_contract),
    ] {
        if value < Decimal::ZERO {
            return Err(validation(format!("fees.{name} must not be negative")));
        }
    }

    config
        .timezone()
        .map_err(|_| validation(format!("unknown market_timezone '{}'", config.market_timezone)))?;

    let metrics = &config.metrics;
    if !(metrics.var_confidence > 0.0 && metrics.var_confidence < 1.0) {
        return Err(validation(
            "metrics.var_confidence must be between 0.0 and 1.0 (exclusive)",
        ));
    }
    if !metrics.risk_free_rate.is_finite() {
        return Err(validation("metrics.risk_free_rate must be finite"));
    }
    for (name, value) in [
        ("periods_per_year", metrics.periods_per_year),
        ("bars_per_year", metrics.bars_per_year),
    ] {
        if !(value.is_finite() && value > 0.0) {
            return Err(validation(format!("metrics.{name} must be positive")));
        }
    }

    if config.batch.min_parallel_jobs == 0 {
        return Err(validation("batch.min_parallel_jobs must be at least 1"));
    }

    Ok(())
}
