//! Type conversion and formatting utilities.
//!
//! Balances and points are unbounded integers. They travel as `BigUint`
//! inside the service, as decimal strings at the storage boundary and as
//! `U256` at the chain boundary.

use alloy::primitives::{hex, U256};
use anyhow::Context;
use bigdecimal::BigDecimal;
use num_bigint::{BigInt, BigUint};
use once_cell::sync::Lazy;
use std::str::FromStr;

// ============================================
// Hex Encoding
// ============================================

/// Encode bytes as a lowercase hex string with 0x prefix.
pub fn hex_encode(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// ============================================
// U256 Conversions
// ============================================

/// Convert alloy U256 to an unbounded BigUint without going through strings.
pub fn u256_to_biguint(value: U256) -> BigUint {
    BigUint::from_bytes_be(&value.to_be_bytes::<32>())
}

// ============================================
// Decimal String Conversions
// ============================================

/// Parse a base-10 integer string (as stored in NUMERIC columns) into a BigUint.
///
/// A trailing `.0…` fraction is accepted because some drivers render
/// integral NUMERIC values with a scale.
pub fn parse_biguint(value: &str) -> anyhow::Result<BigUint> {
    let trimmed = value.trim();
    let integral = match trimmed.split_once('.') {
        Some((int_part, frac)) if frac.chars().all(|c| c == '0') => int_part,
        Some(_) => anyhow::bail!("Expected an integral value, got {}", trimmed),
        None => trimmed,
    };

    BigUint::from_str(integral).with_context(|| format!("Invalid unsigned integer: {}", value))
}

/// Render a raw token amount with its decimals applied, e.g. `1500000` with 6
/// decimals becomes `1.5`. Only used for log output.
pub fn format_units(value: &BigUint, decimals: u8) -> String {
    let big_value = BigDecimal::from(BigInt::from(value.clone()));
    let adjusted = if decimals == 0 { big_value } else { big_value / big_pow10(decimals) };

    adjusted.normalized().to_string()
}

// ============================================
// Internal Helpers
// ============================================

static POW10_CACHE: Lazy<[BigDecimal; 25]> =
    Lazy::new(|| std::array::from_fn(|i| BigDecimal::from(BigInt::from(10u32).pow(i as u32))));

/// Compute 10^exp as BigDecimal.
pub(crate) fn big_pow10(exp: u8) -> BigDecimal {
    if (exp as usize) < POW10_CACHE.len() {
        POW10_CACHE[exp as usize].clone()
    } else {
        BigDecimal::from(BigInt::from(10u32).pow(exp as u32))
    }
}
