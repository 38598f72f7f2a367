//! Monetary amounts in integer cents

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// A strictly positive amount of money in cents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Cents(i64);

impl Cents {
    /// Validate a raw cent value
    pub fn new(value: i64) -> Result<Self, LedgerError> {
        if value <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "{} is not a positive number of cents",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Cents {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Cents::new(value)
    }
}

impl From<Cents> for i64 {
    fn from(c: Cents) -> i64 {
        c.0
    }
}

/// Accepts any JSON number, rejecting fractional and non-positive values
/// instead of rounding them.
impl TryFrom<&serde_json::Number> for Cents {
    type Error = LedgerError;

    fn try_from(n: &serde_json::Number) -> Result<Self, Self::Error> {
        if let Some(v) = n.as_i64() {
            return Cents::new(v);
        }
        if n.is_u64() {
            return Err(LedgerError::InvalidAmount(format!("{} is out of range", n)));
        }
        match n.as_f64() {
            Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Cents::new(f as i64)
            }
            _ => Err(LedgerError::InvalidAmount(format!(
                "{} is not an integral number of cents",
                n
            ))),
        }
    }
}

impl std::fmt::Display for Cents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}
