//! Money types with precise decimal arithmetic
//!
//! This module provides a type-safe representation of monetary values
//! using rust_decimal for precise calculations without floating-point errors.
//! Ledger amounts are kept at 4 decimal places internally and rounded to the
//! currency's minor unit whenever a fee component or discount is derived.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;
use thiserror::Error;

/// Currencies accepted by the school
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    USD,
    /// Cambodian riel, billed in whole riel
    KHR,
}

impl Currency {
    /// Returns the number of decimal places billed in this currency
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::USD => 2,
            Currency::KHR => 0,
        }
    }

    /// Returns the currency symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::USD => "$",
            Currency::KHR => "៛",
        }
    }

    /// Returns the ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::KHR => "KHR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Currency mismatch: cannot operate on {0} and {1}")]
    CurrencyMismatch(String, String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Division by zero")]
    DivisionByZero,
}

/// A monetary amount with associated currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Creates a new Money value
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: amount.round_dp(4),
            currency,
        }
    }

    /// Creates Money from an integer amount in minor units (e.g., cents)
    pub fn from_minor(minor_units: i64, currency: Currency) -> Self {
        let divisor = Decimal::new(10_i64.pow(currency.decimal_places()), 0);
        Self::new(Decimal::new(minor_units, 0) / divisor, currency)
    }

    /// Creates a zero amount in the specified currency
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: dec!(0),
            currency,
        }
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Returns the currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Returns true if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Returns true if the amount is positive
    pub fn is_positive(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// Returns true if the amount is negative
    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Returns the absolute value
    pub fn abs(&self) -> Self {
        Self {
            amount: self.amount.abs(),
            currency: self.currency,
        }
    }

    /// Rounds to the currency's billing precision, half away from zero
    pub fn round_to_currency(&self) -> Self {
        Self {
            amount: self.amount.round_dp_with_strategy(
                self.currency.decimal_places(),
                RoundingStrategy::MidpointAwayFromZero,
            ),
            currency: self.currency,
        }
    }

    /// Rounds using banker's rounding (round half to even)
    pub fn round_bankers(&self, dp: u32) -> Self {
        Self {
            amount: self
                .amount
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven),
            currency: self.currency,
        }
    }

    /// Returns an error unless both values share a currency
    pub fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.to_string(),
                other.currency.to_string(),
            ));
        }
        Ok(())
    }

    /// Checked addition that returns an error on currency mismatch
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount + other.amount, self.currency))
    }

    /// Checked subtraction that returns an error on currency mismatch
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(Self::new(self.amount - other.amount, self.currency))
    }

    /// Multiplies by a scalar (e.g., for rate calculations)
    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::new(self.amount * factor, self.currency)
    }

    /// Divides by a scalar
    pub fn divide(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        Ok(Self::new(self.amount / divisor, self.currency))
    }

    /// Returns the smaller of two amounts in the same currency
    pub fn min(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(if self.amount <= other.amount { *self } else { *other })
    }

    /// Sums a sequence of amounts, starting from zero in `currency`
    ///
    /// # Arguments
    ///
    /// * `items` - Amounts to add, all in `currency`
    /// * `currency` - Currency of the result, used when `items` is empty
    ///
    /// # Returns
    ///
    /// The total, or `MoneyError::CurrencyMismatch` on the first foreign amount
    pub fn sum<'a, I>(items: I, currency: Currency) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        items
            .into_iter()
            .try_fold(Money::zero(currency), |acc, m| acc.checked_add(m))
    }

    /// Allocates the money into n equal parts, handling remainders
    /// The remainder is distributed among the first allocations
    pub fn allocate(&self, n: u32) -> Result<Vec<Money>, MoneyError> {
        if n == 0 {
            return Err(MoneyError::InvalidAmount("Cannot allocate to zero parts".to_string()));
        }

        let dp = self.currency.decimal_places();
        let total_minor = self.amount * Decimal::new(10_i64.pow(dp), 0);
        let total_minor = total_minor.round().mantissa();

        let base_amount = total_minor / n as i128;
        let remainder = (total_minor % n as i128) as u32;

        let mut allocations = Vec::with_capacity(n as usize);
        for i in 0..n {
            let minor = if i < remainder {
                base_amount + 1
            } else {
                base_amount
            };
            allocations.push(Money::from_minor(minor as i64, self.currency));
        }

        Ok(allocations)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = self.currency.decimal_places();
        write!(
            f,
            "{}{:.dp$}",
            self.currency.symbol(),
            self.amount,
            dp = dp as usize
        )
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.amount, self.currency)
    }
}

/// A percentage rate, such as a sibling or early-payment discount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate {
    /// The rate as a decimal (e.g., 0.05 for 5%)
    value: Decimal,
}

impl Rate {
    /// Creates a rate from a decimal value (e.g., 0.05 for 5%)
    pub fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Creates a rate from a percentage, rejecting values outside 0..=100
    ///
    /// # Arguments
    ///
    /// * `percentage` - Percentage points (e.g., 10 for a 10% sibling discount)
    ///
    /// # Returns
    ///
    /// The equivalent `Rate`, or `MoneyError::InvalidAmount` when out of range
    pub fn from_percentage(percentage: Decimal) -> Result<Self, MoneyError> {
        if percentage < Decimal::ZERO || percentage > dec!(100) {
            return Err(MoneyError::InvalidAmount(format!(
                "percentage {} is outside 0..=100",
                percentage
            )));
        }
        Ok(Self {
            value: percentage / dec!(100),
        })
    }

    /// Returns the rate as a decimal
    pub fn as_decimal(&self) -> Decimal {
        self.value
    }

    /// Returns the rate as a percentage
    pub fn as_percentage(&self) -> Decimal {
        self.value * dec!(100)
    }

    /// Applies this rate to a money amount, rounded to the currency precision
    ///
    /// # Returns
    ///
    /// A `Money` in the same currency as `money`
    pub fn apply(&self, money: &Money) -> Money {
        let raw = Money {
            amount: money.amount * self.value,
            currency: money.currency,
        };
        raw.round_to_currency()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percentage().normalize())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn money_allocation_sum_equals_original(
            amount in 1i64..1_000_000_000i64,
            parts in 1u32..100u32
        ) {
            let money = Money::from_minor(amount, Currency::USD);
            let allocations = money.allocate(parts).unwrap();

            let total: Decimal = allocations.iter().map(|m| m.amount()).sum();
            prop_assert_eq!(total, money.amount());
        }

        #[test]
        fn rate_never_exceeds_base(
            amount in 1i64..1_000_000_000i64,
            percent in 0u32..=100u32
        ) {
            let money = Money::from_minor(amount, Currency::USD);
            let rate = Rate::from_percentage(Decimal::from(percent)).unwrap();
            prop_assert!(rate.apply(&money).amount() <= money.amount());
        }
    }
}
