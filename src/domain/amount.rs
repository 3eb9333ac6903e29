//! Fixed-point token amount handling.
//!
//! All token amounts are integer base-unit quantities (`U256`) tagged with a
//! [`Precision`]. Conversions between user-facing decimal strings and raw
//! amounts go through exact integer arithmetic; floating point is never
//! involved, so values like 0.1 survive a parse/format round trip unchanged.

use alloy_primitives::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of base-unit decimals a token uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 18 decimals (pegged token, wrapped collateral, pool shares).
    Ether,
    /// 6 decimals (USDC-style stables).
    Micro,
}

impl Precision {
    /// Base-unit decimals for this precision.
    pub fn decimals(&self) -> u32 {
        match self {
            Precision::Ether => 18,
            Precision::Micro => 6,
        }
    }

    /// One whole unit in base units (10^decimals).
    pub fn unit(&self) -> U256 {
        pow10(self.decimals())
    }
}

/// 10^n as a U256. `n` must be below 78 (the U256 decimal capacity).
pub fn pow10(n: u32) -> U256 {
    U256::from(10u64).pow(U256::from(n))
}

/// Why a user-entered amount string could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AmountParseError {
    /// Empty or still being typed ("" or "12."); not an error to shout about.
    #[error("amount is incomplete")]
    Incomplete,
    /// Not a plain decimal number.
    #[error("amount is not a valid number")]
    Malformed,
    /// Negative amounts are never meaningful here.
    #[error("amount must not be negative")]
    Negative,
}

/// Parse a user-entered decimal string into base units.
///
/// Fraction digits beyond the precision are truncated toward zero. Empty
/// input and a trailing bare decimal point report [`AmountParseError::Incomplete`]
/// so callers can suppress error styling while the value is mid-edit.
pub fn parse_amount(text: &str, precision: Precision) -> Result<U256, AmountParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AmountParseError::Incomplete);
    }
    if let Some(rest) = trimmed.strip_prefix('-') {
        // "-" alone is mid-edit, anything else is a real negative.
        if rest.is_empty() {
            return Err(AmountParseError::Incomplete);
        }
        return Err(AmountParseError::Negative);
    }

    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (trimmed, None),
    };

    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountParseError::Malformed);
    }
    if let Some(frac) = frac_part {
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountParseError::Malformed);
        }
        // "12." and "." are still being typed.
        if frac.is_empty() {
            return Err(AmountParseError::Incomplete);
        }
    }
    if int_part.is_empty() && frac_part.is_none() {
        return Err(AmountParseError::Malformed);
    }

    let decimals = precision.decimals() as usize;
    let int_value = if int_part.is_empty() {
        U256::ZERO
    } else {
        U256::from_str_radix(int_part, 10).map_err(|_| AmountParseError::Malformed)?
    };

    let frac = frac_part.unwrap_or("");
    let kept: String = frac.chars().take(decimals).collect();
    let frac_value = if kept.is_empty() {
        U256::ZERO
    } else {
        let padded = format!("{kept:0<decimals$}");
        U256::from_str_radix(&padded, 10).map_err(|_| AmountParseError::Malformed)?
    };

    int_value
        .checked_mul(pow10(precision.decimals()))
        .and_then(|scaled| scaled.checked_add(frac_value))
        .ok_or(AmountParseError::Malformed)
}

/// Format base units as an exact decimal string with trailing zeros trimmed.
pub fn format_amount(raw: U256, precision: Precision) -> String {
    let unit = precision.unit();
    let int = raw / unit;
    let frac = raw % unit;
    if frac.is_zero() {
        return int.to_string();
    }
    let decimals = precision.decimals() as usize;
    let digits = frac.to_string();
    let frac_digits = format!("{digits:0>decimals$}");
    let trimmed = frac_digits.trim_end_matches('0');
    format!("{int}.{trimmed}")
}

/// Knobs for magnitude-aware display formatting.
#[derive(Debug, Clone, Copy)]
pub struct DisplayOptions {
    /// Fraction digits shown when the whole-unit part is non-zero.
    pub standard_decimals: u32,
    /// Fraction digits shown for values below one whole unit.
    pub small_decimals: u32,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        DisplayOptions {
            standard_decimals: 4,
            small_decimals: 8,
        }
    }
}

/// Format base units for display, truncating to a magnitude-aware number of
/// fraction digits. A strictly positive amount that would truncate to zero
/// renders as a floor indicator (e.g. "<0.0001") instead of a misleading "0".
pub fn format_display(raw: U256, precision: Precision, opts: &DisplayOptions) -> String {
    if raw.is_zero() {
        return "0".to_string();
    }
    let decimals = precision.decimals();
    let whole = raw / precision.unit();
    let budget = if whole.is_zero() {
        opts.small_decimals.min(decimals)
    } else {
        opts.standard_decimals.min(decimals)
    };

    // Truncate to `budget` fraction digits.
    let shifted = raw / pow10(decimals - budget);
    if shifted.is_zero() {
        if budget == 0 {
            return "<1".to_string();
        }
        let zeros = "0".repeat(budget as usize - 1);
        return format!("<0.{zeros}1");
    }

    let scale = pow10(budget);
    let int = shifted / scale;
    let frac = shifted % scale;
    if frac.is_zero() {
        return int.to_string();
    }
    let width = budget as usize;
    let digits = frac.to_string();
    let frac_digits = format!("{digits:0>width$}");
    let trimmed = frac_digits.trim_end_matches('0');
    format!("{int}.{trimmed}")
}

/// Rescale a raw amount between precisions. Scaling up is exact; scaling
/// down truncates toward zero.
pub fn rescale(raw: U256, from: Precision, to: Precision) -> U256 {
    let from_d = from.decimals();
    let to_d = to.decimals();
    if to_d >= from_d {
        raw * pow10(to_d - from_d)
    } else {
        raw / pow10(from_d - to_d)
    }
}

/// Convert base units to a `Decimal` for display math (USD valuation, fee
/// percentages). Returns `None` when the amount exceeds Decimal's 96-bit
/// mantissa; callers fall back to the exact string formatters.
pub fn to_decimal(raw: U256, precision: Precision) -> Option<Decimal> {
    let as_u128: u128 = raw.try_into().ok()?;
    let as_i128 = i128::try_from(as_u128).ok()?;
    Decimal::try_from_i128_with_scale(as_i128, precision.decimals())
        .ok()
        .map(|d| d.normalize())
}

/// USD value of a raw amount at the given unit price, for display only.
pub fn usd_value(raw: U256, precision: Precision, unit_price: Decimal) -> Option<Decimal> {
    let qty = to_decimal(raw, precision)?;
    qty.checked_mul(unit_price)
}
