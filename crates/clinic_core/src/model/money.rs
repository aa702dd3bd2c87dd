//! Fixed-point money helpers.
//!
//! # Invariants
//! - Amounts are stored as integer minor units (cents).
//! - Conversions reject extra precision instead of rounding it away.
//! - No conversion path goes through `f64`.

use super::ValidationError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Number of fractional digits kept for every amount.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Converts an amount into integer minor units.
pub fn to_minor_units(field: &'static str, amount: Decimal) -> Result<i64, ValidationError> {
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(ValidationError::ExcessPrecision {
            field,
            value: amount,
        });
    }
    amount
        .checked_mul(Decimal::from(100))
        .and_then(|scaled| scaled.to_i64())
        .ok_or(ValidationError::AmountOutOfRange { field })
}

/// Converts integer minor units back into an amount with two decimals.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

pub(crate) fn ensure_non_negative(
    field: &'static str,
    amount: Decimal,
) -> Result<(), ValidationError> {
    if amount < Decimal::ZERO {
        return Err(ValidationError::NegativeAmount { field });
    }
    to_minor_units(field, amount).map(|_| ())
}

pub(crate) fn ensure_positive(field: &'static str, amount: Decimal) -> Result<(), ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount { field });
    }
    to_minor_units(field, amount).map(|_| ())
}

/// Serializes amounts as strings with exactly two decimals.
///
/// Keeps audit snapshots stable: `100`, `100.0` and `100.00` all render as
/// `"100.00"`, so equal amounts never show up as a change.
pub(crate) mod amount_serde {
    use super::MINOR_UNIT_SCALE;
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut scaled = *value;
        scaled.rescale(MINOR_UNIT_SCALE);
        serializer.serialize_str(&scaled.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Decimal::from_str(&raw).map_err(serde::de::Error::custom)
    }
}
