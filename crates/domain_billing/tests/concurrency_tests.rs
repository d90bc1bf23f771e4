//! Concurrent commands against shared rows

use std::sync::Arc;

use rust_decimal_macros::dec;

use core_kernel::{StudentId, TermId};
use domain_billing::{BillingError, ErrorKind, InvoiceStatus, LedgerService, LedgerStore};
use test_utils::{
    assert_command_ok, assert_invoice_consistent, assert_money_eq, assert_money_zero, LedgerHarness,
    MoneyFixtures, NewPaymentBuilder,
};

// ============================================================================
// Payment races
// ============================================================================

mod payment_race_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_full_payments_only_one_confirms() {
        let h = LedgerHarness::new();
        let student = StudentId::new();
        let fee = h.simple_fee(student, MoneyFixtures::usd(dec!(450))).await;
        let invoice = h.invoice(student, None, vec![fee.id]).await;

        let mut payment_ids = Vec::new();
        for _ in 0..2 {
            let payment = h
                .record(
                    NewPaymentBuilder::new(student, MoneyFixtures::usd(dec!(450)))
                        .for_invoice(invoice.id)
                        .build(),
                )
                .await;
            payment_ids.push(payment.id());
        }

        let mut handles = Vec::new();
        for payment_id in payment_ids {
            let service: Arc<LedgerService> = h.service.clone();
            let actor = h.cashier.clone();
            handles.push(tokio::spawn(async move {
                service.confirm_payment(payment_id, &actor).await.into_result()
            }));
        }

        let mut confirmed = 0;
        let mut over_allocated = 0;
        for handle in handles {
            match handle.await.expect("task completes") {
                Ok(_) => confirmed += 1,
                Err(err @ BillingError::OverAllocation { .. }) => {
                    assert_eq!(err.kind(), ErrorKind::StateConflict);
                    over_allocated += 1;
                }
                Err(other) => panic!("unexpected failure: {other}"),
            }
        }
        assert_eq!(confirmed, 1);
        assert_eq!(over_allocated, 1);

        let invoice = h.service.get_invoice(invoice.id).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert_money_zero(&invoice.amount_outstanding);
        assert_money_eq(&invoice.amount_allocated, &MoneyFixtures::usd(dec!(450)));
        assert_invoice_consistent(&invoice);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_small_payments_all_land() {
        let h = LedgerHarness::new();
        let student = StudentId::new();
        let fee = h.simple_fee(student, MoneyFixtures::usd(dec!(100))).await;
        let invoice = h.invoice(student, None, vec![fee.id]).await;

        let mut payment_ids = Vec::new();
        for _ in 0..3 {
            let payment = h
                .record(
                    NewPaymentBuilder::new(student, MoneyFixtures::usd(dec!(10)))
                        .for_invoice(invoice.id)
                        .build(),
                )
                .await;
            payment_ids.push(payment.id());
        }

        let mut handles = Vec::new();
        for payment_id in payment_ids {
            let service = h.service.clone();
            let actor = h.cashier.clone();
            handles.push(tokio::spawn(async move {
                service.confirm_payment(payment_id, &actor).await.into_result()
            }));
        }
        for handle in handles {
            handle.await.expect("task completes").expect("payment confirmed");
        }

        let invoice = h.service.get_invoice(invoice.id).await.unwrap();
        let fee = h.service.get_fee(fee.id).await.unwrap();
        assert_money_eq(&invoice.amount_outstanding, &MoneyFixtures::usd(dec!(70)));
        assert_money_eq(&fee.amount_paid, &MoneyFixtures::usd(dec!(30)));
    }
}

// ============================================================================
// Promotion races
// ============================================================================

mod promotion_race_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_promotion_creates_one_carryover() {
        let h = LedgerHarness::new();
        let student = StudentId::new();
        let (spring, autumn) = (TermId::new(), TermId::new());
        let fee = h.simple_fee(student, MoneyFixtures::usd(dec!(200))).await;
        h.invoice(student, Some(spring), vec![fee.id]).await;

        let mut handles = Vec::new();
        for _ in 0..2 {
            let service = h.service.clone();
            let actor = h.cashier.clone();
            handles.push(tokio::spawn(async move {
                service
                    .promote_student(student, spring, autumn, &actor)
                    .await
                    .into_result()
            }));
        }

        let mut promoted = 0;
        for handle in handles {
            match handle.await.expect("task completes") {
                Ok(result) => {
                    promoted += 1;
                    assert_money_eq(&result.carried_amount(), &MoneyFixtures::usd(dec!(200)));
                }
                Err(err) => assert!(
                    matches!(err, BillingError::AlreadyPromoted { .. }),
                    "unexpected failure: {err}"
                ),
            }
        }
        assert_eq!(promoted, 1);

        let carryover = h.store.find_carryover(student, autumn).await.unwrap();
        assert!(carryover.is_some());
        let invoices = h.store.list_invoices_for_student(student).await.unwrap();
        assert_eq!(invoices.iter().filter(|i| i.term_id == Some(autumn)).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_source_term_raced_into_two_destinations() {
        let h = LedgerHarness::new();
        let student = StudentId::new();
        let spring = TermId::new();
        let destinations = [TermId::new(), TermId::new()];
        let fee = h.simple_fee(student, MoneyFixtures::usd(dec!(200))).await;
        h.invoice(student, Some(spring), vec![fee.id]).await;

        let mut handles = Vec::new();
        for destination in destinations {
            let service = h.service.clone();
            let actor = h.cashier.clone();
            handles.push(tokio::spawn(async move {
                service
                    .promote_student(student, spring, destination, &actor)
                    .await
                    .into_result()
            }));
        }

        let mut promoted = 0;
        for handle in handles {
            match handle.await.expect("task completes") {
                Ok(_) => promoted += 1,
                Err(err) => assert!(
                    matches!(err, BillingError::AlreadyCarriedForward { .. }),
                    "unexpected failure: {err}"
                ),
            }
        }
        assert_eq!(promoted, 1);

        let carryovers = h.store.list_carryovers_for_student(student).await.unwrap();
        assert_eq!(carryovers.len(), 1);
        let invoices = h.store.list_invoices_for_student(student).await.unwrap();
        let owed = invoices
            .iter()
            .filter(|i| i.is_live())
            .map(|i| i.amount_outstanding.amount())
            .sum::<rust_decimal::Decimal>();
        assert_eq!(owed, dec!(200));
    }
}

// ============================================================================
// Stale writes
// ============================================================================

mod stale_write_tests {
    use super::*;
    use domain_billing::ChangeSet;

    #[tokio::test]
    async fn test_stale_fee_update_is_rejected() {
        let h = LedgerHarness::new();
        let fee = h.simple_fee(StudentId::new(), MoneyFixtures::usd(dec!(50))).await;
        assert_command_ok(h.service.waive_fee(fee.id, "Hardship", &h.cashier).await);

        // `fee` still carries the version from before the waiver
        let mut changes = ChangeSet::new();
        changes.update(fee);
        let err = h.store.commit(changes).await.unwrap_err();
        assert_eq!(BillingError::from(err).kind(), ErrorKind::ConcurrencyConflict);
        assert!(h.store.conflict_count() >= 1);
    }
}
