//! Fee model for futures position changes.
//!
//! Fees are computed in `Decimal` and handed to the engine as `f64`.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use super::config::FeeParameters;
use crate::error::{BacktestError, Result};

/// Validated fee parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeModel {
    params: FeeParameters,
    point_value: f64,
    margin_per_contract: f64,
}

impl FeeModel {
    /// Validate `params`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `point_value` is not positive or any
    /// fee, rate or margin is negative.
    pub fn new(params: FeeParameters) -> Result<Self> {
        if params.point_value <= Decimal::ZERO {
            return Err(BacktestError::invalid_parameter(
                "point_value",
                format!("must be positive, got {}", params.point_value),
            ));
        }

        for (name, value) in [
            ("fixed_fee_per_contract", params.fixed_fee_per_contract),
            ("variable_fee_rate", params.variable_fee_rate),
            ("margin_rate", params.margin_rate),
            ("overnight_fee_per_contract", params.overnight_fee_per_contract),
        ] {
            if value < Decimal::ZERO {
                return Err(BacktestError::invalid_parameter(
                    name,
                    format!("must not be negative, got {value}"),
                ));
            }
        }

        let point_value = to_f64("point_value", params.point_value)?;
        let margin_per_contract = params
            .margin_rate
            .checked_mul(params.point_value)
            .ok_or_else(|| BacktestError::invalid_parameter("margin_rate", "overflow"))
            .and_then(|m| to_f64("margin_rate", m))?;

        Ok(Self {
            params,
            point_value,
            margin_per_contract,
        })
    }

    /// Underlying parameters.
    #[must_use]
    pub const fn params(&self) -> &FeeParameters {
        &self.params
    }

    /// Currency value of a one-point move for one contract.
    #[must_use]
    pub const fn point_value(&self) -> f64 {
        self.point_value
    }

    /// Fee for moving from `prev` to `new` contracts at `price`.
    ///
    /// `fixed * |Δ| + variable_rate * |Δ| * price * point_value`. A flip
    /// from +1 to -1 is |Δ| = 2. No change costs exactly 0.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the inputs are outside the range
    /// representable in fixed point.
    pub fn fee(&self, prev: f64, new: f64, price: f64) -> Result<f64> {
        let delta = (new - prev).abs();
        if delta == 0.0 {
            return Ok(0.0);
        }

        let delta = from_f64("position_change", delta)?;
        let price = from_f64("price", price)?;

        let fixed = self.params.fixed_fee_per_contract.checked_mul(delta);
        let variable = self
            .params
            .variable_fee_rate
            .checked_mul(delta)
            .and_then(|v| v.checked_mul(price))
            .and_then(|v| v.checked_mul(self.params.point_value));

        let total = fixed
            .zip(variable)
            .and_then(|(f, v)| f.checked_add(v))
            .ok_or_else(|| BacktestError::invalid_parameter("fee", "overflow"))?;
        to_f64("fee", total)
    }

    /// Carry fee for `held` contracts kept across a trading-day boundary.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `held` is outside the fixed-point range.
    pub fn overnight_fee(&self, held: f64) -> Result<f64> {
        if held == 0.0 || self.params.overnight_fee_per_contract.is_zero() {
            return Ok(0.0);
        }
        let held = from_f64("position", held.abs())?;
        let total = self
            .params
            .overnight_fee_per_contract
            .checked_mul(held)
            .ok_or_else(|| BacktestError::invalid_parameter("overnight_fee", "overflow"))?;
        to_f64("overnight_fee", total)
    }

    /// Margin posted for `max_abs_position` contracts.
    #[must_use]
    pub fn margin_floor(&self, max_abs_position: f64) -> f64 {
        self.margin_per_contract * max_abs_position
    }
}

fn from_f64(name: &str, value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| {
        BacktestError::invalid_parameter(name, format!("{value} is outside the fixed-point range"))
    })
}

fn to_f64(name: &str, value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| BacktestError::invalid_parameter(name, format!("{value} is not representable")))
}
