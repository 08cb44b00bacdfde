//! Yen amounts and minor-unit arithmetic.
//!
//! All monetary values inside the checkout are whole yen held as integers. The
//! only place where decimal text enters is an external processor reporting a
//! captured amount such as `"10500.00"`; [`minor_units`] turns that into an
//! exact integer count of hundredths so that comparisons never go through
//! floating point.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// A non-negative amount of Japanese yen.
///
/// Serialized as a plain JSON number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Yen(u64);

impl Yen {
    pub const ZERO: Yen = Yen(0);

    pub const fn new(amount: u64) -> Self {
        Self(amount)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Amount in hundredths, the unit external processors are compared in.
    pub fn minor_units(&self) -> i128 {
        i128::from(self.0) * 100
    }

    pub fn saturating_sub(self, rhs: Yen) -> Yen {
        Yen(self.0.saturating_sub(rhs.0))
    }

    /// Multiplies by a line quantity.
    pub fn times(self, quantity: u32) -> Yen {
        Yen(self.0.saturating_mul(u64::from(quantity)))
    }
}

impl Display for Yen {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "¥{}", self.0)
    }
}

impl From<u64> for Yen {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Add for Yen {
    type Output = Yen;

    fn add(self, rhs: Yen) -> Self::Output {
        Yen(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Yen {
    type Output = Yen;

    fn sub(self, rhs: Yen) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl Sum for Yen {
    fn sum<I: Iterator<Item = Yen>>(iter: I) -> Self {
        iter.fold(Yen::ZERO, Add::add)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyParseError {
    #[error("invalid decimal amount {0:?}")]
    Invalid(String),
    #[error("amount {0} is out of range")]
    OutOfRange(String),
}

/// Parses a decimal amount string and rounds it half away from zero to an integer
/// number of hundredths.
///
/// `"10500.00"` becomes `1_050_000`, `"10499.995"` becomes `1_050_000`,
/// `"10499.99"` stays `1_049_999`.
pub fn minor_units(amount: &str) -> Result<i128, MoneyParseError> {
    let trimmed = amount.trim();
    let decimal = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| MoneyParseError::Invalid(amount.to_string()))?;
    let scaled = decimal
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(|| MoneyParseError::OutOfRange(amount.to_string()))?;
    scaled
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i128()
        .ok_or_else(|| MoneyParseError::OutOfRange(amount.to_string()))
}
