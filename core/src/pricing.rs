//! Fee quotes.

use crate::money::Money;
use serde::{Deserialize, Serialize};

/// Price breakdown for one reservation row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Unit price × quantity
    pub subtotal: Money,
    /// Platform fee, floor-rounded
    pub fee: Money,
    /// Subtotal + fee
    pub total: Money,
}

/// Quotes `quantity` units at `unit_price` with a platform fee of `fee_bps`.
///
/// Returns `None` on overflow.
#[must_use]
pub fn quote(unit_price: Money, quantity: u32, fee_bps: u32) -> Option<Quote> {
    let subtotal = unit_price.checked_mul(quantity)?;
    let fee = subtotal.basis_points(fee_bps);
    let total = subtotal.checked_add(fee)?;
    Some(Quote { subtotal, fee, total })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fee_is_floor_rounded() {
        let q = quote(Money::new(3_333), 3, 150).unwrap();
        assert_eq!(q.subtotal, Money::new(9_999));
        assert_eq!(q.fee, Money::new(149));
        assert_eq!(q.total, Money::new(10_148));
    }

    #[test]
    fn zero_fee_by_default() {
        let q = quote(Money::new(25_000), 2, 0).unwrap();
        assert_eq!(q.total, q.subtotal);
    }

    #[test]
    fn overflow_is_none() {
        assert!(quote(Money::new(u64::MAX), 2, 0).is_none());
    }

    proptest! {
        #[test]
        fn fee_never_exceeds_exact_rate(price in 0u64..1_000_000, qty in 1u32..50, bps in 0u32..2_000) {
            let q = quote(Money::new(price), qty, bps).unwrap();
            let exact = u128::from(q.subtotal.units()) * u128::from(bps);
            prop_assert!(u128::from(q.fee.units()) * 10_000 <= exact);
            prop_assert!(exact < (u128::from(q.fee.units()) + 1) * 10_000);
            prop_assert_eq!(q.total.units(), q.subtotal.units() + q.fee.units());
        }
    }
}
