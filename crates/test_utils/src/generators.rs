//! Property-Based Test Generators
//!
//! Proptest strategies for amounts and fee operation sequences.

use proptest::prelude::*;
use rust_decimal::Decimal;

use core_kernel::{Currency, Money};

/// Strategy for USD amounts between one cent and `max_dollars`
pub fn usd_amount_strategy(max_dollars: i64) -> impl Strategy<Value = Money> {
    (1i64..=max_dollars * 100).prop_map(|cents| Money::from_minor(cents, Currency::USD))
}

/// Strategy for whole-riel KHR amounts
pub fn khr_amount_strategy() -> impl Strategy<Value = Money> {
    (100i64..10_000_000i64).prop_map(|riel| Money::from_minor(riel, Currency::KHR))
}

/// Strategy for discount percentages with two decimal places (0% to 100%)
pub fn percentage_strategy() -> impl Strategy<Value = Decimal> {
    (0u32..=10000u32).prop_map(|n| Decimal::new(n as i64, 2))
}

/// A step applied to a single fee in property tests
#[derive(Debug, Clone, PartialEq)]
pub enum FeeOperation {
    /// Pay this many cents against the fee
    Pay(i64),
    /// Void the n-th confirmed payment, if it exists
    Void(usize),
    /// Run the late-fee sweep this many days after the due date
    Accrue(u32),
}

pub fn fee_operation_strategy() -> impl Strategy<Value = FeeOperation> {
    prop_oneof![
        4 => (1i64..40_000i64).prop_map(FeeOperation::Pay),
        2 => (0usize..4usize).prop_map(FeeOperation::Void),
        1 => (0u32..60u32).prop_map(FeeOperation::Accrue),
    ]
}

pub fn fee_operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<FeeOperation>> {
    prop::collection::vec(fee_operation_strategy(), 1..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn usd_amounts_are_positive(money in usd_amount_strategy(1000)) {
            prop_assert!(money.is_positive());
            prop_assert_eq!(money.currency(), Currency::USD);
        }

        #[test]
        fn percentages_stay_in_range(p in percentage_strategy()) {
            prop_assert!(p >= Decimal::ZERO && p <= Decimal::ONE_HUNDRED);
        }
    }
}
