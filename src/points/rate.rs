use std::str::FromStr;

use anyhow::{bail, Context, Result};
use bigdecimal::{BigDecimal, RoundingMode};
use num_bigint::BigUint;
use num_traits::Zero;

const SECONDS_PER_HOUR: u32 = 3_600;

/// Accrual rate as an exact fraction, in points per token unit per hour.
///
/// `numerator = round_half_up(rate × scale)` and `denominator = scale`, so a
/// rate of `0.05` at the default scale of `1000` becomes `50 / 1000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsRate {
    numerator: BigUint,
    denominator: BigUint,
}

impl PointsRate {
    /// Build a rate from its configured decimal value.
    ///
    /// The float goes through its shortest decimal rendering, so `0.05`
    /// scales to exactly `50` instead of `49.999…`.
    pub fn from_decimal(rate: f64, scale: u64) -> Result<Self> {
        if !rate.is_finite() || rate < 0.0 {
            bail!("Points rate must be a non-negative number, got {}", rate);
        }
        if scale == 0 {
            bail!("Points rate scale must be positive");
        }

        let decimal = BigDecimal::from_str(&rate.to_string())
            .with_context(|| format!("Invalid points rate {}", rate))?;
        let scaled = (decimal * BigDecimal::from(scale)).with_scale_round(0, RoundingMode::HalfUp);
        let (digits, _) = scaled.into_bigint_and_exponent();

        let numerator = digits
            .to_biguint()
            .with_context(|| format!("Points rate {} scaled to a negative value", rate))?;

        Ok(Self {
            numerator,
            denominator: BigUint::from(scale),
        })
    }

    pub fn numerator(&self) -> &BigUint {
        &self.numerator
    }

    pub fn denominator(&self) -> &BigUint {
        &self.denominator
    }

    /// Points earned by holding `balance` for `seconds`, rounded down.
    pub fn points_for(&self, balance: &BigUint, seconds: u64) -> BigUint {
        if seconds == 0 || balance.is_zero() || self.numerator.is_zero() {
            return BigUint::zero();
        }

        let earned = balance * &self.numerator * BigUint::from(seconds);
        earned / (BigUint::from(SECONDS_PER_HOUR) * &self.denominator)
    }
}
