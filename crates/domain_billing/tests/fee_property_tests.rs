//! Property-based tests for fee balances and invoice totals

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal_macros::dec;

use core_kernel::temporal::add_days;
use core_kernel::{ActorId, Currency, Money, StudentId};
use domain_billing::invoice::recalculate_status;
use domain_billing::student_fee::{AssignmentContext, FeeSource};
use domain_billing::{FeeStatus, Invoice, LineItem, StudentFee};
use test_utils::{
    assert_fee_consistent, assert_invoice_consistent, fee_operations_strategy, usd_amount_strategy,
    AdHocFixtures, FeeOperation, MoneyFixtures, TemporalFixtures,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()
}

fn due() -> NaiveDate {
    TemporalFixtures::term_start()
}

fn exam_fee() -> StudentFee {
    let terms = AdHocFixtures::with_late_fee(MoneyFixtures::usd(dec!(200)), due(), 3, MoneyFixtures::usd(dec!(15)));
    let context = AssignmentContext {
        enrollment_id: None,
        term_id: None,
        trigger_date: due(),
        has_enrolled_sibling: false,
        manual_discount: None,
    };
    StudentFee::assign(StudentId::new(), FeeSource::AdHoc(&terms), &context, ActorId::new(), due(), now()).unwrap()
}

// ============================================================================
// Fee balance properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Any mix of payments, voids and late-fee runs keeps
    /// `paid + outstanding == final + late fee`
    #[test]
    fn fee_balance_holds_under_any_history(ops in fee_operations_strategy(20)) {
        let mut fee = exam_fee();
        let mut live: Vec<Money> = Vec::new();

        for op in ops {
            match op {
                FeeOperation::Pay(cents) => {
                    let outstanding = fee.amount_outstanding().unwrap();
                    if !outstanding.is_positive() {
                        continue;
                    }
                    let amount = Money::from_minor(cents, Currency::USD).min(&outstanding).unwrap();
                    fee.allocate(amount, now()).unwrap();
                    live.push(amount);
                }
                FeeOperation::Void(n) => {
                    if n < live.len() {
                        let amount = live.remove(n);
                        fee.reverse_allocation(amount, due(), now()).unwrap();
                    }
                }
                FeeOperation::Accrue(days) => {
                    let as_of = add_days(due(), days).unwrap();
                    fee.accrue_late_fee(as_of, now()).unwrap();
                }
            }
            assert_fee_consistent(&fee);
            let paid = Money::sum(live.iter(), Currency::USD).unwrap();
            prop_assert_eq!(fee.amount_paid, paid);
        }

        if !live.is_empty() {
            prop_assert!(fee.has_allocations);
            prop_assert!(fee.ensure_deletable().is_err());
        }
    }

    /// A late fee is charged at most once, however often the sweep runs
    #[test]
    fn late_fee_is_charged_once(days in prop::collection::vec(0u32..90, 1..10)) {
        let mut fee = exam_fee();
        let mut charges = 0;
        for d in days {
            if fee.accrue_late_fee(add_days(due(), d).unwrap(), now()).unwrap() {
                charges += 1;
            }
        }
        prop_assert!(charges <= 1);
        let expected = if charges == 1 { dec!(15) } else { dec!(0) };
        prop_assert_eq!(fee.late_fee_applied.amount(), expected);
        if charges == 1 {
            prop_assert_eq!(fee.status, FeeStatus::Overdue);
        }
    }
}

// ============================================================================
// Invoice total properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Allocating any prefix of the lines' value keeps totals consistent
    #[test]
    fn invoice_totals_follow_allocations(
        amounts in prop::collection::vec(usd_amount_strategy(500), 1..6),
        paid_share in 0u32..=100,
    ) {
        let lines: Vec<LineItem> = amounts
            .iter()
            .enumerate()
            .map(|(i, m)| LineItem::supply(format!("Item {}", i + 1), *m))
            .collect();
        let mut invoice = Invoice::new(
            "INV-2026-00001".into(),
            StudentId::new(),
            None,
            Currency::USD,
            lines,
            ActorId::new(),
            due(),
            now(),
        )
        .unwrap();
        assert_invoice_consistent(&invoice);

        let total = invoice.amount_total;
        let pay = total.multiply(rust_decimal::Decimal::from(paid_share) / dec!(100)).round_to_currency();
        if pay.is_positive() {
            invoice.allocate(pay, now()).unwrap();
        }
        assert_invoice_consistent(&invoice);

        let totals = recalculate_status(&invoice).unwrap();
        prop_assert_eq!(totals.total, total);
        prop_assert_eq!(
            totals.outstanding.checked_add(&invoice.amount_allocated).unwrap(),
            total
        );
    }
}
