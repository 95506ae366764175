//! Value objects: equality by value, not identity.
//!
//! Value objects have **no identity** - they are defined entirely by their
//! attribute values. Two value objects with the same values are equal.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
///
/// - **Value Object**: no identity (`Money(35000) == Money(35000)`)
/// - **Entity**: identity (two movements with equal quantities are still two movements)
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Monetary amount in the smallest currency unit (e.g., cents).
///
/// Signed so that malformed input (a negative discount) can be represented and
/// rejected by validation instead of wrapping silently.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(amount: i64) -> Self {
        Self(amount)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("monetary amount overflow"))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or_else(|| DomainError::validation("monetary amount overflow"))
    }

    /// Multiply a unit price by a quantity.
    pub fn times(self, quantity: i64) -> DomainResult<Money> {
        self.0
            .checked_mul(quantity)
            .map(Money)
            .ok_or_else(|| DomainError::validation("monetary amount overflow"))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_two_decimal_places() {
        assert_eq!(Money::from_minor(35000).to_string(), "350.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
        assert_eq!(Money::from_minor(-1250).to_string(), "-12.50");
    }

    #[test]
    fn overflow_is_a_validation_error() {
        let err = Money::from_minor(i64::MAX).times(2).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(Money::from_minor(i64::MAX).checked_add(Money::from_minor(1)).is_err());
    }

    #[test]
    fn times_multiplies_unit_price() {
        assert_eq!(Money::from_minor(100).times(3).unwrap(), Money::from_minor(300));
    }
}
