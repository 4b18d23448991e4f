// Fixed-width field formatting

use super::{NachaError, NachaResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Upper-case, printable ASCII only, left-justified, space-padded, truncated to `width`
pub fn alphanumeric(value: &str, width: usize) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .take(width)
        .collect();
    format!("{cleaned:<width$}")
}

/// Right-justified, zero-filled; overflow is an error
pub fn numeric(field: &'static str, value: &str, width: usize) -> NachaResult<String> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(NachaError::NotNumeric {
            field,
            value: value.to_string(),
        });
    }
    if value.len() > width {
        return Err(NachaError::NumericOverflow {
            field,
            value: value.to_string(),
            width,
        });
    }
    Ok(format!("{value:0>width$}"))
}

pub fn number(field: &'static str, value: u64, width: usize) -> NachaResult<String> {
    numeric(field, &value.to_string(), width)
}

pub fn blanks(width: usize) -> String {
    " ".repeat(width)
}

/// Dollar amount → whole cents
pub fn to_cents(amount: Decimal) -> NachaResult<u64> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(NachaError::NegativeAmount(amount.to_string()));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_u64()
        .ok_or_else(|| NachaError::NegativeAmount(amount.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_alphanumeric_uppercases_pads_and_truncates() {
        assert_eq!(alphanumeric("Jane Doe", 10), "JANE DOE  ");
        assert_eq!(alphanumeric("abcdefghij-klm", 10), "ABCDEFGHIJ");
        assert_eq!(alphanumeric("tab\there", 8), "TABHERE ");
        assert_eq!(alphanumeric("Zoë", 4), "ZO  ");
    }

    #[test]
    fn test_numeric_zero_fills() {
        assert_eq!(numeric("amount", "1234", 10).unwrap(), "0000001234");
        assert_eq!(number("count", 7, 6).unwrap(), "000007");
    }

    #[test]
    fn test_numeric_overflow_is_error() {
        let err = numeric("amount", "12345678901", 10).unwrap_err();
        assert!(matches!(err, NachaError::NumericOverflow { field: "amount", .. }));
        assert!(numeric("routing", "12a", 8).is_err());
    }

    #[test]
    fn test_to_cents() {
        assert_eq!(to_cents(dec!(1234.56)).unwrap(), 123456);
        assert_eq!(to_cents(dec!(0)).unwrap(), 0);
        assert_eq!(to_cents(dec!(0.005)).unwrap(), 0);
        assert!(to_cents(dec!(-1.00)).is_err());
    }
}
