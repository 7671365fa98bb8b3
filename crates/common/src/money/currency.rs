use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::MoneyError;

/// A normalized three-letter currency code (`"usd"` becomes `"USD"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Length every currency code must have.
    pub const CODE_LEN: usize = 3;

    /// Normalizes `input` into a currency code.
    ///
    /// Surrounding whitespace is ignored. The rest must be exactly three
    /// ASCII letters, which are upper-cased.
    pub fn from_code(input: &str) -> Result<Self, MoneyError> {
        let code = input.trim();
        if code.len() != Self::CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(input.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_code(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl AsRef<str> for Currency {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
