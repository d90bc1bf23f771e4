//! Integration tests for the PostgreSQL store and sequence generator
//!
//! These start a PostgreSQL container and are ignored by default. Run with
//! `cargo test -p infra_db -- --ignored` on a machine with Docker.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal_macros::dec;

use core_kernel::{Actor, FixedClock, SequenceGenerator, StaticActorContext, StudentId, TermId};
use domain_billing::{
    ChangeSet, FeeStatus, InvoiceStatus, LedgerConfig, LedgerService, LedgerStore, PaymentStatus, StoreError,
};
use infra_db::{PostgresLedgerStore, PostgresSequenceGenerator};
use test_utils::{
    assert_command_ok, assert_money_eq, assert_money_zero, create_isolated_test_database, AdHocFixtures,
    MoneyFixtures, NewPaymentBuilder, ProfileFixtures, TemporalFixtures, TestDatabase,
};

struct PgHarness {
    _db: TestDatabase,
    store: Arc<PostgresLedgerStore>,
    sequences: Arc<PostgresSequenceGenerator>,
    service: LedgerService,
    cashier: StaticActorContext,
}

async fn harness() -> PgHarness {
    let db = create_isolated_test_database().await.expect("database starts");
    let store = Arc::new(PostgresLedgerStore::new(db.pool().clone()));
    let sequences = Arc::new(PostgresSequenceGenerator::new(db.pool().clone()));
    let service = LedgerService::new(
        store.clone(),
        Arc::new(FixedClock::at_date(TemporalFixtures::term_start())),
        sequences.clone(),
        LedgerConfig::default(),
    );
    PgHarness {
        _db: db,
        store,
        sequences,
        service,
        cashier: StaticActorContext::new(Actor::new("Front Desk").with_role("cashier")),
    }
}

// ============================================================================
// Sequence generator
// ============================================================================

mod sequence_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_sequences_are_scoped_by_series_and_year() {
        let h = harness().await;
        assert_eq!(h.sequences.next_value("INV", 2026).await.unwrap(), 1);
        assert_eq!(h.sequences.next_value("INV", 2026).await.unwrap(), 2);
        assert_eq!(h.sequences.next_value("PAY", 2026).await.unwrap(), 1);
        assert_eq!(h.sequences.next_value("INV", 2027).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_concurrent_callers_never_share_a_value() {
        let h = harness().await;
        let mut handles = Vec::new();
        for _ in 0..20 {
            let sequences = h.sequences.clone();
            handles.push(tokio::spawn(async move { sequences.next_value("PAY", 2026).await }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            let value = handle.await.expect("task completes").expect("value issued");
            assert!(seen.insert(value), "value {value} issued twice");
        }
        assert_eq!(seen.len(), 20);
        assert_eq!(seen.iter().max(), Some(&20));
    }
}

// ============================================================================
// Ledger store
// ============================================================================

mod store_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_full_payment_cycle_round_trips() {
        let h = harness().await;
        let student = StudentId::new();
        let term = TermId::new();

        let fee = assert_command_ok(
            h.service
                .assign_fee(
                    test_utils::assign_request(
                        ProfileFixtures::returning(student),
                        domain_billing::FeeSelection::AdHoc(AdHocFixtures::materials(
                            MoneyFixtures::usd(dec!(300)),
                            TemporalFixtures::term_start(),
                        )),
                    ),
                    &h.cashier,
                )
                .await,
        );
        assert_eq!(fee.version, 1);

        let invoice = assert_command_ok(
            h.service
                .create_invoice(
                    domain_billing::CreateInvoiceRequest {
                        student_id: student,
                        term_id: Some(term),
                        fee_ids: vec![fee.id],
                    },
                    &h.cashier,
                )
                .await,
        );
        assert_eq!(invoice.invoice_number, "INV-2026-00001");

        let payment = assert_command_ok(
            h.service
                .record_payment(
                    NewPaymentBuilder::new(student, MoneyFixtures::usd(dec!(300)))
                        .for_invoice(invoice.id)
                        .build(),
                    &h.cashier,
                )
                .await,
        );
        let payment = assert_command_ok(h.service.confirm_payment(payment.id(), &h.cashier).await);
        assert_eq!(payment.status(), PaymentStatus::Confirmed);

        let stored_invoice = h.service.get_invoice_by_number("INV-2026-00001").await.unwrap();
        assert_eq!(stored_invoice.status, InvoiceStatus::Paid);
        assert_money_zero(&stored_invoice.amount_outstanding);
        assert_eq!(stored_invoice.version, 2);

        let stored_fee = h.service.get_fee(fee.id).await.unwrap();
        assert_eq!(stored_fee.status, FeeStatus::Paid);
        assert_money_eq(&stored_fee.amount_paid, &MoneyFixtures::usd(dec!(300)));

        assert!(h.store.list_outstanding_invoices(Some(student)).await.unwrap().is_empty());
        assert!(h.store.list_unsettled_fees().await.unwrap().is_empty());
        assert_eq!(h.service.payment_history(student).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_stale_update_is_a_conflict() {
        let h = harness().await;
        let student = StudentId::new();
        let fee = assert_command_ok(
            h.service
                .assign_fee(
                    test_utils::assign_request(
                        ProfileFixtures::returning(student),
                        domain_billing::FeeSelection::AdHoc(AdHocFixtures::materials(
                            MoneyFixtures::usd(dec!(40)),
                            TemporalFixtures::term_start(),
                        )),
                    ),
                    &h.cashier,
                )
                .await,
        );
        let fee_id = fee.id;
        assert_command_ok(h.service.waive_fee(fee_id, "Hardship", &h.cashier).await);

        let mut changes = ChangeSet::new();
        changes.update(fee);
        let err = h.store.commit(changes).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "got {err:?}");

        // the failed commit left the waiver in place
        let stored = h.service.get_fee(fee_id).await.unwrap();
        assert_eq!(stored.status, FeeStatus::Waived);
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_second_promotion_is_rejected() {
        let h = harness().await;
        let student = StudentId::new();
        let (spring, autumn) = (TermId::new(), TermId::new());

        let first = assert_command_ok(h.service.promote_student(student, spring, autumn, &h.cashier).await);
        assert!(first.invoice.is_none());

        let found = h.store.find_carryover(student, autumn).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(first.carryover.id));

        let second = h.service.promote_student(student, spring, autumn, &h.cashier).await;
        assert!(matches!(
            second.error(),
            Some(domain_billing::BillingError::AlreadyPromoted { .. })
        ));

        let third = h.service.promote_student(student, spring, TermId::new(), &h.cashier).await;
        assert!(matches!(
            third.error(),
            Some(domain_billing::BillingError::AlreadyCarriedForward { .. })
        ));
        let all = h.store.list_carryovers_for_student(student).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
