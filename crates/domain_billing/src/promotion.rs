//! Promotion and carryover
//!
//! When a student moves to a new term, whatever they still owe on the
//! source term's invoices moves to a single carryover invoice in the
//! destination term. The source invoices are closed with a matching credit
//! line and their unpaid fees are marked carried forward, so the balance is
//! owed in exactly one place. One carryover record per (student, destination
//! term) makes promotion idempotent, including when nothing was owed, and a
//! source term with a carryover record cannot be carried again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{ActorId, CarryoverId, InvoiceId, Money, StudentId, TermId};

use crate::error::BillingError;
use crate::invoice::Invoice;

/// Immutable record of a balance moved between terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionCarryover {
    pub id: CarryoverId,
    pub student_id: StudentId,
    pub source_term: TermId,
    pub destination_term: TermId,
    pub amount: Money,
    /// None when there was nothing to carry
    pub invoice_id: Option<InvoiceId>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl PromotionCarryover {
    pub fn new(
        student_id: StudentId,
        source_term: TermId,
        destination_term: TermId,
        amount: Money,
        invoice_id: Option<InvoiceId>,
        created_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        if source_term == destination_term {
            return Err(BillingError::invalid("source and destination terms must differ"));
        }
        if amount.is_negative() {
            return Err(BillingError::InvariantViolation(format!(
                "carryover amount for {} is negative ({})",
                student_id, amount
            )));
        }
        if amount.is_positive() != invoice_id.is_some() {
            return Err(BillingError::InvariantViolation(
                "a carryover invoice exists exactly when an amount is carried".into(),
            ));
        }
        Ok(Self {
            id: CarryoverId::new_v7(),
            student_id,
            source_term,
            destination_term,
            amount,
            invoice_id,
            created_by,
            created_at: now,
            version: 0,
        })
    }

    /// Uniqueness key enforced by the store
    pub fn promotion_key(student_id: StudentId, destination_term: TermId) -> String {
        format!("{}:{}", student_id, destination_term)
    }
}

/// Outcome of promoting one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionResult {
    pub carryover: PromotionCarryover,
    pub invoice: Option<Invoice>,
}

impl PromotionResult {
    pub fn carried_amount(&self) -> Money {
        self.carryover.amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionFailure {
    pub student_id: StudentId,
    pub reason: String,
}

/// Outcome of a bulk promotion; failures are reported, never raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BulkPromotionReport {
    pub total: usize,
    pub successful: usize,
    pub failed: Vec<PromotionFailure>,
}

impl BulkPromotionReport {
    pub fn record_success(&mut self) {
        self.total += 1;
        self.successful += 1;
    }

    pub fn record_failure(&mut self, student_id: StudentId, reason: impl Into<String>) {
        self.total += 1;
        self.failed.push(PromotionFailure {
            student_id,
            reason: reason.into(),
        });
    }
}
