use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Currencies the ledger understands. Amounts in different currencies never
/// mix implicitly; every cross-currency operation takes an explicit ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Saudi Riyal
    Sar,
    /// Yemeni Rial
    Yer,
    /// US Dollar
    Usd,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Sar => "SAR",
            Currency::Yer => "YER",
            Currency::Usd => "USD",
        }
    }

    /// Number of decimal places in the currency's minor unit.
    pub fn minor_units(&self) -> u32 {
        match self {
            Currency::Sar | Currency::Yer | Currency::Usd => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SAR" => Ok(Currency::Sar),
            "YER" => Ok(Currency::Yer),
            "USD" => Ok(Currency::Usd),
            _ => Err(MoneyError::UnknownCurrency(s.to_string())),
        }
    }
}

/// An immutable currency-tagged amount backed by a fixed-point decimal.
/// All monetary arithmetic in the crate goes through this type; raw numeric
/// math on amounts elsewhere is a bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyValue {
    pub amount: Decimal,
    pub currency: Currency,
}

impl MoneyValue {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Add two values of the same currency.
    pub fn add(&self, other: &MoneyValue) -> Result<MoneyValue, MoneyError> {
        self.check_currency(other)?;
        Ok(MoneyValue::new(self.amount + other.amount, self.currency))
    }

    /// Subtract a value of the same currency.
    pub fn sub(&self, other: &MoneyValue) -> Result<MoneyValue, MoneyError> {
        self.check_currency(other)?;
        Ok(MoneyValue::new(self.amount - other.amount, self.currency))
    }

    /// Convert into `target` at the given ratio, rounding to the target
    /// currency's minor unit with banker's rounding (half to even).
    pub fn convert(&self, target: Currency, ratio: Decimal) -> MoneyValue {
        let converted = (self.amount * ratio)
            .round_dp_with_strategy(target.minor_units(), RoundingStrategy::MidpointNearestEven);
        MoneyValue::new(converted, target)
    }

    /// Convert into `target` at the given ratio, rounding down to the
    /// target currency's minor unit. The result never exceeds the exact
    /// conversion, so it is safe to use as a spending cap.
    pub fn convert_floor(&self, target: Currency, ratio: Decimal) -> MoneyValue {
        let converted = (self.amount * ratio)
            .round_dp_with_strategy(target.minor_units(), RoundingStrategy::ToZero);
        MoneyValue::new(converted, target)
    }

    pub fn neg(&self) -> MoneyValue {
        MoneyValue::new(-self.amount, self.currency)
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// Compare two same-currency values.
    pub fn cmp_amount(&self, other: &MoneyValue) -> Result<std::cmp::Ordering, MoneyError> {
        self.check_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    fn check_currency(&self, other: &MoneyValue) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for MoneyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    CurrencyMismatch { left: Currency, right: Currency },
    UnknownCurrency(String),
}

impl fmt::Display for MoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoneyError::CurrencyMismatch { left, right } => {
                write!(f, "currency mismatch: {} vs {}", left, right)
            }
            MoneyError::UnknownCurrency(s) => write!(f, "unknown currency: {}", s),
        }
    }
}

impl std::error::Error for MoneyError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_add_same_currency() {
        let a = MoneyValue::new(dec!(100.50), Currency::Sar);
        let b = MoneyValue::new(dec!(49.50), Currency::Sar);
        assert_eq!(
            a.add(&b).unwrap(),
            MoneyValue::new(dec!(150.00), Currency::Sar)
        );
    }

    #[test]
    fn test_add_currency_mismatch() {
        let a = MoneyValue::new(dec!(100), Currency::Sar);
        let b = MoneyValue::new(dec!(100), Currency::Yer);
        assert!(matches!(a.add(&b), Err(MoneyError::CurrencyMismatch { .. })));
    }

    #[test]
    fn test_convert_rounds_to_minor_units() {
        // 100 SAR at 66.665 YER/SAR = 6666.50 YER
        let sar = MoneyValue::new(dec!(100), Currency::Sar);
        let yer = sar.convert(Currency::Yer, dec!(66.665));
        assert_eq!(yer, MoneyValue::new(dec!(6666.50), Currency::Yer));
    }

    #[test]
    fn test_convert_floor_never_rounds_up() {
        let usd = MoneyValue::new(dec!(0.002666), Currency::Usd);
        assert_eq!(usd.convert(Currency::Sar, dec!(3.75)).amount, dec!(0.01));
        assert_eq!(
            usd.convert_floor(Currency::Sar, dec!(3.75)).amount,
            Decimal::ZERO
        );
    }

    #[test]
    fn test_convert_uses_bankers_rounding() {
        // 0.125 rounds to 0.12 (half to even), 0.135 rounds to 0.14
        let m = MoneyValue::new(dec!(1), Currency::Sar);
        assert_eq!(m.convert(Currency::Usd, dec!(0.125)).amount, dec!(0.12));
        assert_eq!(m.convert(Currency::Usd, dec!(0.135)).amount, dec!(0.14));
    }

    #[test]
    fn test_neg_and_sign_checks() {
        let m = MoneyValue::new(dec!(25), Currency::Yer);
        assert!(m.is_positive());
        assert!(m.neg().is_negative());
        assert!(MoneyValue::zero(Currency::Yer).is_zero());
        assert!(!MoneyValue::zero(Currency::Yer).is_negative());
    }

    #[test]
    fn test_cmp_amount() {
        let a = MoneyValue::new(dec!(10), Currency::Sar);
        let b = MoneyValue::new(dec!(20), Currency::Sar);
        assert_eq!(a.cmp_amount(&b).unwrap(), std::cmp::Ordering::Less);

        let c = MoneyValue::new(dec!(10), Currency::Usd);
        assert!(a.cmp_amount(&c).is_err());
    }

    #[test]
    fn test_currency_roundtrip() {
        for c in [Currency::Sar, Currency::Yer, Currency::Usd] {
            assert_eq!(c.as_str().parse::<Currency>().unwrap(), c);
        }
        assert!("XXX".parse::<Currency>().is_err());
    }
}
