//! Per-currency dispatch thresholds.

use std::collections::HashMap;

use common::{Amount, Currency, MoneyError};
use thiserror::Error;

/// Errors in the threshold configuration. All of them are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThresholdError {
    /// A currency was declared without a value.
    #[error("threshold for {0} is empty")]
    Empty(String),

    /// The currency code is invalid.
    #[error("invalid threshold currency: {0}")]
    Currency(MoneyError),

    /// The value is not a decimal.
    #[error("invalid threshold for {currency}: {source}")]
    Amount {
        currency: String,
        source: MoneyError,
    },

    /// The value is negative.
    #[error("threshold for {0} is negative")]
    Negative(String),
}

/// Immutable mapping of currency to the amount at which a batch becomes ready.
///
/// Currencies without an entry never become ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThresholdTable {
    thresholds: HashMap<Currency, Amount>,
}

impl ThresholdTable {
    /// Builds the table from raw `(code, value)` pairs as found in configuration.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ThresholdError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut thresholds = HashMap::new();
        for (code, value) in pairs {
            let (code, value) = (code.as_ref(), value.as_ref().trim());
            if value.is_empty() {
                return Err(ThresholdError::Empty(code.to_string()));
            }
            let currency = Currency::from_code(code).map_err(ThresholdError::Currency)?;
            let amount = Amount::parse(value).map_err(|source| ThresholdError::Amount {
                currency: currency.to_string(),
                source,
            })?;
            if amount.is_negative() {
                return Err(ThresholdError::Negative(currency.to_string()));
            }
            thresholds.insert(currency, amount);
        }
        Ok(Self { thresholds })
    }

    /// Returns the threshold configured for `currency`.
    pub fn get(&self, currency: &Currency) -> Option<&Amount> {
        self.thresholds.get(currency)
    }

    /// Returns true if `amount` reaches the threshold for `currency`.
    pub fn is_reached(&self, currency: &Currency, amount: &Amount) -> bool {
        self.get(currency).is_some_and(|t| amount.reaches(t))
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}
