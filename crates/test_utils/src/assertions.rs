//! Custom Test Assertions
//!
//! Assertion helpers for ledger types that report balances in full when
//! they fail.

use core_kernel::Money;
use domain_billing::{CommandResult, ErrorKind, FeeStatus, Invoice, InvoiceStatus, StudentFee};

/// Asserts two amounts are identical, currency included
pub fn assert_money_eq(actual: &Money, expected: &Money) {
    assert_eq!(
        actual, expected,
        "Money mismatch: actual={}, expected={}",
        actual, expected
    );
}

/// Asserts that a Money value is zero
pub fn assert_money_zero(money: &Money) {
    assert!(money.is_zero(), "Expected zero money, got {}", money);
}

/// Asserts `paid + outstanding == final + late fee` and that the stored
/// status agrees with the balances
pub fn assert_fee_consistent(fee: &StudentFee) {
    let final_amount = fee.final_amount().expect("final amount");
    let outstanding = fee.amount_outstanding().expect("outstanding");
    let owed = final_amount
        .checked_add(&fee.late_fee_applied)
        .expect("same currency");
    let covered = fee.amount_paid.checked_add(&outstanding).expect("same currency");

    assert!(!outstanding.is_negative(), "fee {} outstanding is negative: {}", fee.id, outstanding);
    assert!(!fee.amount_paid.is_negative(), "fee {} paid is negative: {}", fee.id, fee.amount_paid);
    if fee.status.is_terminal() {
        return;
    }
    assert_eq!(
        covered, owed,
        "fee {}: paid {} + outstanding {} != final {} + late {}",
        fee.id, fee.amount_paid, outstanding, final_amount, fee.late_fee_applied
    );
    if outstanding.is_zero() {
        assert_eq!(fee.status, FeeStatus::Paid, "fee {} fully paid but {:?}", fee.id, fee.status);
    }
}

/// Asserts the stored invoice totals and status match its lines
pub fn assert_invoice_consistent(invoice: &Invoice) {
    let totals = domain_billing::invoice::recalculate_status(invoice).expect("invoice recalculates");
    assert_eq!(invoice.amount_total, totals.total, "invoice {} total", invoice.invoice_number);
    assert_eq!(
        invoice.amount_outstanding, totals.outstanding,
        "invoice {} outstanding",
        invoice.invoice_number
    );
    assert_eq!(invoice.status, totals.status, "invoice {} status", invoice.invoice_number);
    if invoice.status != InvoiceStatus::Cancelled {
        assert_eq!(invoice.amount_outstanding.is_zero(), invoice.status == InvoiceStatus::Paid);
    }
}

/// Unwraps a successful command result
pub fn assert_command_ok<T: std::fmt::Debug>(result: CommandResult<T>) -> T {
    assert!(result.succeeded, "expected success, got {:?}", result.error());
    result.into_result().expect("command succeeded")
}

/// Asserts a command failed with the given classification
pub fn assert_command_failed<T: std::fmt::Debug>(result: &CommandResult<T>, kind: ErrorKind) {
    assert!(!result.succeeded, "expected {:?} failure, got {:?}", kind, result.data());
    assert_eq!(result.error_kind, Some(kind), "unexpected error {:?}", result.error());
}
