//! Currency codes and exact decimal arithmetic.
//!
//! Amounts are carried as [`rust_decimal::Decimal`] so no value ever passes
//! through binary floating point. All functions are pure.

mod amount;
mod currency;

pub use amount::Amount;
pub use currency::Currency;

use thiserror::Error;

/// Errors raised by money and currency parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// The currency code is not exactly three ASCII letters.
    #[error("currency code '{0}' does not match ISO 4217 standard")]
    InvalidCurrency(String),

    /// The amount is not a decimal number.
    #[error("'{0}' is not a valid decimal amount")]
    InvalidAmount(String),

    /// The amount is zero, or is already a whole number and yields no contribution.
    #[error("provided amount value is zero")]
    ZeroAmount,

    /// The amount is negative.
    #[error("provided amount value is negative")]
    NegativeAmount,

    /// The sum no longer fits the decimal representation.
    #[error("amount overflow")]
    Overflow,

    /// The exact sum needs more significant digits than the decimal holds.
    #[error("amount cannot be held without rounding")]
    PrecisionLoss,
}
