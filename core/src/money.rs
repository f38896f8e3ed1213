//! Integer money.
//!
//! Amounts are whole units of the marketplace currency (CLP has no minor
//! unit), so every computation stays in `u64` and fee rounding is an explicit
//! floor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Basis points in 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Non-negative amount of money in the smallest currency unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Creates an amount from raw units
    #[must_use]
    pub const fn new(units: u64) -> Self {
        Self(units)
    }

    /// Raw units
    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    /// `true` if this is zero
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Subtraction clamped at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Checked multiplication by a quantity
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// `floor(self * bps / 10_000)`.
    ///
    /// Computed in `u128` so large amounts cannot overflow the intermediate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn basis_points(self, bps: u32) -> Self {
        let scaled = (self.0 as u128) * (bps as u128) / (BPS_DENOMINATOR as u128);
        Self(scaled as u64)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|m| m.0).fold(0, u64::saturating_add))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_points_floor() {
        assert_eq!(Money::new(999).basis_points(250), Money::new(24));
        assert_eq!(Money::new(10_000).basis_points(0), Money::ZERO);
        assert_eq!(Money::new(u64::MAX).basis_points(10_000), Money::new(u64::MAX));
    }

    #[test]
    fn saturating_sub_clamps() {
        assert_eq!(Money::new(5).saturating_sub(Money::new(9)), Money::ZERO);
    }

    #[test]
    fn sums_saturate() {
        let total: Money = [Money::new(3), Money::new(4)].into_iter().sum();
        assert_eq!(total, Money::new(7));
    }
}
