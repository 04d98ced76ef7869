//! Value objects: equality by value, not identity.
//!
//! Value objects have **no identity**. They are defined entirely by their
//! attribute values, so two value objects with the same values are equal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. To "modify" one,
/// build a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Money {
///     amount: i64,
///     currency: String,
/// }
///
/// impl ValueObject for Money {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Fractional digits kept by persistent storage for quantities and stock.
pub const MAX_DECIMAL_SCALE: u32 = 4;

/// Reject values with more significant fractional digits than storage keeps.
///
/// Trailing zeros do not count: `1.50000` is accepted, `1.00005` is not.
pub fn ensure_decimal_scale(field: &str, value: Decimal) -> DomainResult<()> {
    if value.normalize().scale() > MAX_DECIMAL_SCALE {
        return Err(DomainError::validation(format!(
            "{field} supports at most {MAX_DECIMAL_SCALE} decimal places (got {value})"
        )));
    }
    Ok(())
}

/// A strictly positive decimal quantity of a product.
///
/// Invoice lines are always expressed as a `Quantity`; stock deltas are plain
/// signed decimals derived from it (`-quantity` to consume).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "quantity must be greater than zero (got {value})"
            )));
        }
        ensure_decimal_scale("quantity", value)?;
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// The stock delta that consumes this quantity.
    pub fn as_consumption(&self) -> Decimal {
        -self.0
    }
}

impl ValueObject for Quantity {}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <Decimal as Deserialize>::deserialize(deserializer)?;
        Quantity::new(raw).map_err(serde::de::Error::custom)
    }
}
