//! Unit tests for the Money module
//!
//! Tests cover creation in both billing currencies, checked arithmetic,
//! rounding to the billing precision, and percentage rates.

use core_kernel::{Currency, Money, MoneyError, Rate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_new_rounds_to_four_decimal_places() {
        let m = Money::new(dec!(100.123456789), Currency::USD);
        assert_eq!(m.amount(), dec!(100.1235));
    }

    #[test]
    fn test_from_minor_converts_cents() {
        let m = Money::from_minor(10050, Currency::USD);
        assert_eq!(m.amount(), dec!(100.50));
    }

    #[test]
    fn test_from_minor_riel_has_no_decimals() {
        let m = Money::from_minor(40000, Currency::KHR);
        assert_eq!(m.amount(), dec!(40000));
    }

    #[test]
    fn test_zero_is_neither_positive_nor_negative() {
        let m = Money::zero(Currency::KHR);
        assert!(m.is_zero());
        assert!(!m.is_positive());
        assert!(!m.is_negative());
    }

    #[test]
    fn test_negative_amount_is_negative() {
        let m = Money::new(dec!(-5.00), Currency::USD);
        assert!(m.is_negative());
        assert_eq!(m.abs().amount(), dec!(5.00));
        assert_eq!((-m).amount(), dec!(5.00));
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_checked_add_same_currency() {
        let a = Money::new(dec!(120.00), Currency::USD);
        let b = Money::new(dec!(30.50), Currency::USD);
        assert_eq!(a.checked_add(&b).unwrap().amount(), dec!(150.50));
    }

    #[test]
    fn test_checked_sub_can_go_negative() {
        let a = Money::new(dec!(10.00), Currency::USD);
        let b = Money::new(dec!(25.00), Currency::USD);
        assert_eq!(a.checked_sub(&b).unwrap().amount(), dec!(-15.00));
    }

    #[test]
    fn test_mixed_currency_is_rejected() {
        let usd = Money::new(dec!(10.00), Currency::USD);
        let khr = Money::new(dec!(40000), Currency::KHR);
        assert_eq!(
            usd.checked_sub(&khr),
            Err(MoneyError::CurrencyMismatch("USD".to_string(), "KHR".to_string()))
        );
        assert!(usd.min(&khr).is_err());
    }

    #[test]
    fn test_min_picks_smaller_amount() {
        let a = Money::new(dec!(80.00), Currency::USD);
        let b = Money::new(dec!(45.00), Currency::USD);
        assert_eq!(a.min(&b).unwrap(), b);
        assert_eq!(b.min(&a).unwrap(), b);
    }

    #[test]
    fn test_sum_of_empty_is_zero() {
        let empty: Vec<Money> = Vec::new();
        assert!(Money::sum(&empty, Currency::USD).unwrap().is_zero());
    }

    #[test]
    fn test_sum_rejects_mixed_currencies() {
        let items = [
            Money::new(dec!(1.00), Currency::USD),
            Money::new(dec!(100), Currency::KHR),
        ];
        assert!(Money::sum(&items, Currency::USD).is_err());
    }

    #[test]
    fn test_divide_by_zero() {
        let m = Money::new(dec!(10.00), Currency::USD);
        assert_eq!(m.divide(Decimal::ZERO), Err(MoneyError::DivisionByZero));
    }

    #[test]
    fn test_allocate_distributes_remainder_to_first_parts() {
        let m = Money::new(dec!(100.00), Currency::USD);
        let parts = m.allocate(3).unwrap();
        assert_eq!(parts[0].amount(), dec!(33.34));
        assert_eq!(parts[1].amount(), dec!(33.33));
        assert_eq!(parts[2].amount(), dec!(33.33));
    }

    #[test]
    fn test_allocate_zero_parts_is_error() {
        let m = Money::new(dec!(100.00), Currency::USD);
        assert!(m.allocate(0).is_err());
    }
}

mod rounding {
    use super::*;

    #[test]
    fn test_round_to_currency_half_away_from_zero() {
        assert_eq!(
            Money::new(dec!(10.005), Currency::USD).round_to_currency().amount(),
            dec!(10.01)
        );
        assert_eq!(
            Money::new(dec!(-10.005), Currency::USD).round_to_currency().amount(),
            dec!(-10.01)
        );
    }

    #[test]
    fn test_round_to_currency_riel_whole_units() {
        assert_eq!(
            Money::new(dec!(1999.5), Currency::KHR).round_to_currency().amount(),
            dec!(2000)
        );
    }

    #[test]
    fn test_round_bankers() {
        assert_eq!(Money::new(dec!(2.125), Currency::USD).round_bankers(2).amount(), dec!(2.12));
        assert_eq!(Money::new(dec!(2.135), Currency::USD).round_bankers(2).amount(), dec!(2.14));
    }
}

mod rates {
    use super::*;

    #[test]
    fn test_sibling_discount_on_tuition() {
        let rate = Rate::from_percentage(dec!(10)).unwrap();
        let tuition = Money::new(dec!(450.00), Currency::USD);
        assert_eq!(rate.apply(&tuition).amount(), dec!(45.00));
    }

    #[test]
    fn test_rate_in_riel_rounds_to_whole_riel() {
        let rate = Rate::from_percentage(dec!(3)).unwrap();
        let fee = Money::new(dec!(40050), Currency::KHR);
        assert_eq!(rate.apply(&fee).amount(), dec!(1202));
    }

    #[test]
    fn test_rate_bounds() {
        assert!(Rate::from_percentage(dec!(0)).is_ok());
        assert!(Rate::from_percentage(dec!(100)).is_ok());
        assert!(Rate::from_percentage(dec!(100.01)).is_err());
    }

    #[test]
    fn test_rate_display() {
        let rate = Rate::from_percentage(dec!(7.5)).unwrap();
        assert_eq!(rate.to_string(), "7.5%");
    }
}

mod display {
    use super::*;

    #[test]
    fn test_usd_display() {
        assert_eq!(Money::new(dec!(1234.5), Currency::USD).to_string(), "$1234.50");
    }

    #[test]
    fn test_serde_round_trip_keeps_currency_code() {
        let m = Money::new(dec!(12.34), Currency::USD);
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"USD\""));
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
