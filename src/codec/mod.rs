//! Decimal/amount codec
//!
//! Parses textual quotes into fixed-point integers and rescales them to the
//! canonical 18-decimal representation used for all threshold math. Exact
//! integer arithmetic only; floats never enter this module.

use crate::error::CodecError;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Scale every accepted observation is normalized to.
pub const CANONICAL_DECIMALS: u32 = 18;

/// Count digits after the decimal point in a raw textual quote.
/// Integral strings have zero decimals.
pub fn infer_decimals(raw: &str) -> u32 {
    match raw.trim().split_once('.') {
        Some((_, frac)) => frac.len() as u32,
        None => 0,
    }
}

/// Parse a textual price into `(amount, decimals)`.
///
/// The decimal count is inferred from the fractional-part length unless a
/// hint is given; with a hint shorter than the text's precision the amount
/// is truncated to the hinted scale.
pub fn parse_price(text: &str, decimals_hint: Option<u32>) -> Result<(u128, u32), CodecError> {
    let trimmed = text.trim();
    let parsed = Decimal::from_str(trimmed)
        .map_err(|_| CodecError::InvalidNumericFormat(text.to_string()))?;
    if parsed.is_sign_negative() {
        return Err(CodecError::InvalidNumericFormat(text.to_string()));
    }

    // Mantissa is non-negative here; scale is the stored fractional length.
    let mantissa = parsed.mantissa() as u128;
    let scale = parsed.scale();
    let decimals = decimals_hint.unwrap_or_else(|| infer_decimals(trimmed));

    let amount = rescale(mantissa, scale, decimals)?;
    Ok((amount, decimals))
}

/// Rescale a fixed-point amount to the canonical 18-decimal representation.
pub fn normalize_to_18(amount: u128, decimals: u32) -> Result<u128, CodecError> {
    rescale(amount, decimals, CANONICAL_DECIMALS)
}

/// Exact integer rescale from `from` decimals to `to` decimals. Scaling up
/// is checked for overflow; scaling down truncates toward zero.
fn rescale(amount: u128, from: u32, to: u32) -> Result<u128, CodecError> {
    if from == to {
        return Ok(amount);
    }
    let overflow = CodecError::AmountOverflow {
        amount,
        decimals: from,
    };
    if to > from {
        let factor = 10u128.checked_pow(to - from).ok_or_else(|| overflow.clone())?;
        amount.checked_mul(factor).ok_or(overflow)
    } else {
        let factor = 10u128.checked_pow(from - to).ok_or_else(|| overflow.clone())?;
        Ok(amount / factor)
    }
}
