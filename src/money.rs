//! Money Conversion Module
//!
//! The payment gateway reports amounts as integers scaled by 100
//! (`10000000` means `100000` currency units). Everything past the return
//! page works in whole currency units, so all conversions go through here.
//!
//! ## Usage
//! ```rust
//! use swap_settlement::money::{from_gateway_units, parse_gateway_amount};
//! use rust_decimal::Decimal;
//!
//! assert_eq!(from_gateway_units(10_000_000), Decimal::from(100_000));
//! assert_eq!(parse_gateway_amount("10000000").unwrap(), Decimal::from(100_000));
//! ```

use rust_decimal::Decimal;
use thiserror::Error;

/// Gateway amounts carry two implied decimal places.
pub const GATEWAY_SCALE: u32 = 2;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Amount must not be negative")]
    Negative,

    #[error("Invalid gateway amount format: {0}")]
    InvalidFormat(String),
}

// ============================================================================
// Gateway → Currency units
// ============================================================================

/// Convert a gateway-scaled integer to whole currency units.
///
/// Exact: `Decimal::new` moves the decimal point, no float involved.
#[inline]
pub fn from_gateway_units(raw: i64) -> Decimal {
    Decimal::new(raw, GATEWAY_SCALE).normalize()
}

/// Parse the raw `amount` query value from a gateway return.
///
/// The gateway contract only ever sends a non-negative integer string.
pub fn parse_gateway_amount(raw: &str) -> Result<Decimal, MoneyError> {
    let trimmed = raw.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| MoneyError::InvalidFormat(trimmed.to_string()))?;
    if value < 0 {
        return Err(MoneyError::Negative);
    }
    Ok(from_gateway_units(value))
}

/// Parse an amount that is already in whole currency units
/// (backend-processed returns pass the settled amount through unchanged).
pub fn parse_currency_amount(raw: &str) -> Result<Decimal, MoneyError> {
    let trimmed = raw.trim();
    let value: Decimal = trimmed
        .parse()
        .map_err(|_| MoneyError::InvalidFormat(trimmed.to_string()))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(MoneyError::Negative);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gateway_scale_division() {
        assert_eq!(from_gateway_units(10_000_000), dec!(100000));
        assert_eq!(from_gateway_units(12_345), dec!(123.45));
        assert_eq!(from_gateway_units(0), Decimal::ZERO);
    }

    #[test]
    fn test_parse_gateway_amount() {
        assert_eq!(parse_gateway_amount("10000000").unwrap(), dec!(100000));
        assert_eq!(parse_gateway_amount(" 150 ").unwrap(), dec!(1.5));
    }

    #[test]
    fn test_parse_gateway_amount_rejects_garbage() {
        assert!(matches!(
            parse_gateway_amount("12.5"),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert!(matches!(
            parse_gateway_amount("abc"),
            Err(MoneyError::InvalidFormat(_))
        ));
        assert_eq!(parse_gateway_amount("-100"), Err(MoneyError::Negative));
    }

    #[test]
    fn test_parse_currency_amount_is_verbatim() {
        assert_eq!(parse_currency_amount("100000").unwrap(), dec!(100000));
        assert_eq!(parse_currency_amount("99.5").unwrap(), dec!(99.5));
        assert_eq!(parse_currency_amount("-1"), Err(MoneyError::Negative));
    }
}
