//! Fixed-point money arithmetic.
//!
//! Amounts are `rust_decimal` values stored at four fractional digits with
//! half-away-from-zero rounding applied on every construction, so values that
//! flow through arithmetic stay normalized. Amounts are never negative; the
//! signed "effective amount" used by balance computations is a plain
//! `Decimal` and never stored.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Fractional digits kept on every monetary amount.
pub const MONEY_SCALE: u32 = 4;

/// Alphabetic currency code: exactly three ASCII letters, held uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> DomainResult<Self> {
        let code = code.trim();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::invalid_amount(format!(
                "invalid currency code '{code}'"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn usd() -> Self {
        Self("USD".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::usd()
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-negative amount in a single currency.
///
/// Equality is value-based over `(amount, currency)`. All arithmetic is
/// closed over same-currency operands; mixing currencies is rejected at this
/// boundary rather than deep inside a computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Construct a monetary value, rejecting negative amounts and rounding
    /// to [`MONEY_SCALE`] digits (half away from zero).
    pub fn new(amount: Decimal, currency: Currency) -> DomainResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(DomainError::invalid_amount("amount must not be negative"));
        }
        Ok(Self {
            amount: round(amount),
            currency,
        })
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn checked_add(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        Money::new(self.amount + other.amount, self.currency.clone())
    }

    /// Subtraction fails on underflow: amounts cannot go negative.
    pub fn checked_sub(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        if other.amount > self.amount {
            return Err(DomainError::invalid_amount(format!(
                "subtraction underflow: {} - {}",
                self.amount, other.amount
            )));
        }
        Money::new(self.amount - other.amount, self.currency.clone())
    }

    pub fn checked_mul(&self, factor: Decimal) -> DomainResult<Money> {
        if factor.is_sign_negative() {
            return Err(DomainError::invalid_amount(
                "cannot multiply by a negative scalar",
            ));
        }
        Money::new(self.amount * factor, self.currency.clone())
    }

    pub fn checked_div(&self, divisor: Decimal) -> DomainResult<Money> {
        if divisor <= Decimal::ZERO {
            return Err(DomainError::invalid_amount(
                "divisor must be strictly positive",
            ));
        }
        Money::new(self.amount / divisor, self.currency.clone())
    }

    fn ensure_same_currency(&self, other: &Money) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.as_str().to_string(),
                right: other.currency.as_str().to_string(),
            });
        }
        Ok(())
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

fn round(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn usd(s: &str) -> Money {
        Money::new(s.parse().unwrap(), Currency::usd()).unwrap()
    }

    #[test]
    fn construction_rounds_half_away_from_zero() {
        assert_eq!(usd("1.00005").amount(), "1.0001".parse::<Decimal>().unwrap());
        assert_eq!(usd("1.00004").amount(), "1.0000".parse::<Decimal>().unwrap());
    }

    #[test]
    fn negative_amount_is_rejected() {
        let err = Money::new("-0.01".parse().unwrap(), Currency::usd()).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::LedgerInvalidAmount);
    }

    #[test]
    fn subtraction_underflow_fails() {
        let err = usd("1.00").checked_sub(&usd("1.50")).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::LedgerInvalidAmount);
    }

    #[test]
    fn cross_currency_operations_fail() {
        let eur = Money::new("1".parse().unwrap(), Currency::new("eur").unwrap()).unwrap();
        assert!(matches!(
            usd("1").checked_add(&eur),
            Err(DomainError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn currency_is_normalized_uppercase() {
        assert_eq!(Currency::new(" usd ").unwrap().as_str(), "USD");
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("U5D").is_err());
    }

    #[test]
    fn negative_scalar_multiplication_fails() {
        assert!(usd("2").checked_mul("-1".parse().unwrap()).is_err());
        assert!(usd("2").checked_div(Decimal::ZERO).is_err());
    }

    proptest! {
        /// Addition commutes and stays at four digits.
        #[test]
        fn addition_commutes(a in 0i64..1_000_000_000, b in 0i64..1_000_000_000) {
            let a = Money::new(Decimal::new(a, 4), Currency::usd()).unwrap();
            let b = Money::new(Decimal::new(b, 4), Currency::usd()).unwrap();
            let ab = a.checked_add(&b).unwrap();
            let ba = b.checked_add(&a).unwrap();
            prop_assert_eq!(&ab, &ba);
            prop_assert!(ab.amount().scale() <= MONEY_SCALE);
        }

        /// Rounding on construction is idempotent: re-constructing from an
        /// already-rounded amount never changes the value.
        #[test]
        fn rounding_is_stable(raw in -100_000_000i64..100_000_000i64, scale in 0u32..10) {
            let d = Decimal::new(raw.abs(), scale);
            let once = Money::new(d, Currency::usd()).unwrap();
            let twice = Money::new(once.amount(), Currency::usd()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
