use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::MoneyError;

/// An exact decimal amount of money.
///
/// Parsing never rounds: an input with more precision than the decimal can
/// hold is rejected instead of being silently truncated. Display output is
/// normalized, so `"0.330"` and `"0.33"` both print as `0.33`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Amount(Decimal);

impl Amount {
    /// The zero amount a new batch starts from.
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Parses a decimal string such as `"3.67"`.
    pub fn parse(input: &str) -> Result<Self, MoneyError> {
        Decimal::from_str_exact(input.trim())
            .map(Self)
            .map_err(|_| MoneyError::InvalidAmount(input.to_string()))
    }

    /// Wraps an existing decimal.
    pub fn from_decimal(value: Decimal) -> Self {
        Self(value)
    }

    /// Returns the underlying decimal.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        !self.0.is_zero() && self.0.is_sign_negative()
    }

    /// Exact addition.
    ///
    /// `Decimal` rounds the fraction when the sum needs more than 28
    /// significant digits; that case is reported as
    /// [`MoneyError::PrecisionLoss`] instead.
    pub fn checked_add(self, other: Amount) -> Result<Amount, MoneyError> {
        let sum = self.0.checked_add(other.0).ok_or(MoneyError::Overflow)?;
        if sum.scale() < self.0.scale().max(other.0.scale()) {
            return Err(MoneyError::PrecisionLoss);
        }
        Ok(Self(sum))
    }

    /// Returns true when `self >= threshold`.
    pub fn reaches(&self, threshold: &Amount) -> bool {
        self >= threshold
    }

    /// Extracts the round-up investment from a transaction amount:
    /// `ceil(amount) - amount`.
    ///
    /// Zero and negative amounts are rejected, and so is a whole number,
    /// since it would contribute nothing.
    pub fn investment(&self) -> Result<Amount, MoneyError> {
        if self.0.is_zero() {
            return Err(MoneyError::ZeroAmount);
        }
        if self.is_negative() {
            return Err(MoneyError::NegativeAmount);
        }
        let contribution = self.0.ceil() - self.0;
        if contribution.is_zero() {
            return Err(MoneyError::ZeroAmount);
        }
        Ok(Self(contribution))
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Amount {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
