//! Conversions between human amounts and on-chain integers.

use std::str::FromStr;

use alloy_primitives::{Address, U256};
use rust_decimal::Decimal;

/// Converts a decimal amount into base units (wei, token atoms).
///
/// Returns `None` for negative amounts, for amounts with more fractional
/// digits than `decimals`, and on overflow.
#[must_use]
pub fn to_base_units(amount: Decimal, decimals: u32) -> Option<U256> {
    if amount.is_sign_negative() {
        return None;
    }
    let amount = amount.normalize();
    let scale = amount.scale();
    let exponent = decimals.checked_sub(scale)?;
    let mantissa = u128::try_from(amount.mantissa()).ok()?;
    U256::from(mantissa).checked_mul(U256::from(10u8).checked_pow(U256::from(exponent))?)
}

/// Converts base units back into a decimal amount.
///
/// Returns `None` when the value does not fit a [`Decimal`].
#[must_use]
pub fn from_base_units(value: U256, decimals: u32) -> Option<Decimal> {
    let raw: u128 = value.try_into().ok()?;
    let raw = i128::try_from(raw).ok()?;
    Decimal::try_from_i128_with_scale(raw, decimals)
        .ok()
        .map(|d| d.normalize())
}

/// Parses a `0x`-prefixed hex address.
///
/// All-lowercase and all-uppercase forms are accepted as-is. Mixed-case input
/// must carry a valid EIP-55 checksum.
#[must_use]
pub fn parse_address(input: &str) -> Option<Address> {
    let input = input.trim();
    let hex = input.strip_prefix("0x")?;
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        Address::parse_checksummed(input, None).ok()
    } else {
        Address::from_str(input).ok()
    }
}
