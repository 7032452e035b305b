use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// A strictly positive monetary amount.
///
/// Payment attempts, refunds and unit prices on the wire are all expressed with it so the
/// "amount must be positive" rule lives in one place.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::InvalidArgument(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Validates an optional order adjustment (discount, tax, shipping).
pub fn non_negative(field: &str, value: Option<Decimal>) -> Result<Decimal> {
    let value = value.unwrap_or(Decimal::ZERO);
    if value < Decimal::ZERO {
        return Err(EngineError::InvalidArgument(format!(
            "{field} must not be negative"
        )));
    }
    Ok(value)
}

/// Converts a major-unit amount into an integer count of minor units.
///
/// Fails when the amount carries more precision than `minor_per_major` can represent,
/// e.g. 1.005 with 100 tiyin per sum.
pub fn to_minor(value: Decimal, minor_per_major: u32) -> Result<i64> {
    let scaled = value * Decimal::from(minor_per_major);
    if scaled.fract() != Decimal::ZERO {
        return Err(EngineError::InvalidArgument(format!(
            "Amount {value} is not representable in minor units"
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| EngineError::InvalidArgument(format!("Amount {value} is out of range")))
}

/// Converts an integer count of minor units back into a major-unit amount.
pub fn from_minor(minor: i64, minor_per_major: u32) -> Decimal {
    (Decimal::from(minor) / Decimal::from(minor_per_major)).normalize()
}
