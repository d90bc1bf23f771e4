//! Payment ledger
//!
//! Payments follow a one-way state machine:
//!
//! ```text
//!            confirm              void
//!  Pending ───────────▶ Confirmed ─────▶ Voided
//!     │                                    ▲
//!     └────────────────── void ────────────┘
//! ```
//!
//! Once confirmed, a payment's financial fields never change. Corrections
//! are [`PaymentAdjustment`] rows chained to the payment; the payment's net
//! effect is the original amount folded with every adjustment's delta.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use core_kernel::{
    ActorId, AdjustmentId, Currency, InvoiceId, Money, PaymentId, StudentFeeId, StudentId,
};

use crate::error::BillingError;
use crate::student_fee::StudentFee;

/// Payment method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    MobileWallet,
    Cheque,
    Other,
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Recorded, not yet verified; allocates nothing
    Pending,
    /// Verified and allocated; financially locked
    Confirmed,
    /// Cancelled; any allocation has been reversed
    Voided,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Confirmed => "Confirmed",
            PaymentStatus::Voided => "Voided",
        }
    }
}

/// Part of a payment applied to one fee; negative in adjustment rows that
/// take money back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAllocation {
    pub student_fee_id: StudentFeeId,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub confirmed_by: ActorId,
    pub confirmed_at: DateTime<Utc>,
    pub invoice_allocation: Option<Money>,
    pub fee_allocations: Vec<FeeAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidRecord {
    pub reason: String,
    pub voided_by: ActorId,
    pub voided_at: DateTime<Utc>,
    /// What was taken back from the invoice and fees; empty for pending payments
    pub reversed_invoice: Option<Money>,
    pub reversed_fees: Vec<FeeAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNote {
    pub text: String,
    pub author: ActorId,
    pub recorded_at: DateTime<Utc>,
}

fn positive_money(amount: &Money) -> Result<(), ValidationError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(ValidationError::new("amount_must_be_positive"))
    }
}

/// Cashier input for a new payment
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPayment {
    pub student_id: StudentId,
    pub invoice_id: Option<InvoiceId>,
    pub student_fee_id: Option<StudentFeeId>,
    #[validate(custom(function = "positive_money"))]
    pub amount: Money,
    pub method: PaymentMethod,
    pub payment_date: NaiveDate,
    #[validate(length(max = 120))]
    pub paid_for: Option<String>,
}

/// A payment received from or on behalf of a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    reference: String,
    student_id: StudentId,
    invoice_id: Option<InvoiceId>,
    student_fee_id: Option<StudentFeeId>,
    amount: Money,
    method: PaymentMethod,
    payment_date: NaiveDate,
    paid_for: Option<String>,
    status: PaymentStatus,
    received_by: ActorId,
    recorded_at: DateTime<Utc>,
    confirmation: Option<ConfirmationRecord>,
    void: Option<VoidRecord>,
    notes: Vec<PaymentNote>,
    pub version: u64,
}

impl Payment {
    /// Records a pending payment; nothing is allocated until confirmation
    pub fn record(
        request: NewPayment,
        reference: String,
        received_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        if !request.amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "payment amount must be positive, got {}",
                request.amount
            )));
        }
        request.validate()?;
        if request.invoice_id.is_none() && request.student_fee_id.is_none() {
            return Err(BillingError::MissingReference(
                "a payment must target an invoice or a student fee".into(),
            ));
        }
        Ok(Self {
            id: PaymentId::new_v7(),
            reference,
            student_id: request.student_id,
            invoice_id: request.invoice_id,
            student_fee_id: request.student_fee_id,
            amount: request.amount.round_to_currency(),
            method: request.method,
            payment_date: request.payment_date,
            paid_for: request.paid_for.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
            status: PaymentStatus::Pending,
            received_by,
            recorded_at: now,
            confirmation: None,
            void: None,
            notes: Vec::new(),
            version: 0,
        })
    }

    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    pub fn invoice_id(&self) -> Option<InvoiceId> {
        self.invoice_id
    }

    pub fn student_fee_id(&self) -> Option<StudentFeeId> {
        self.student_fee_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn payment_date(&self) -> NaiveDate {
        self.payment_date
    }

    pub fn paid_for(&self) -> Option<&str> {
        self.paid_for.as_deref()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn received_by(&self) -> ActorId {
        self.received_by
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn confirmation(&self) -> Option<&ConfirmationRecord> {
        self.confirmation.as_ref()
    }

    pub fn void_record(&self) -> Option<&VoidRecord> {
        self.void.as_ref()
    }

    pub fn notes(&self) -> &[PaymentNote] {
        &self.notes
    }

    /// Points a pending fee-only payment at the invoice billing its fee
    pub fn bind_invoice(&mut self, invoice_id: InvoiceId) -> Result<(), BillingError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.already_final());
        }
        match self.invoice_id {
            Some(existing) if existing != invoice_id => Err(BillingError::invalid(format!(
                "payment {} already targets invoice {}",
                self.reference, existing
            ))),
            _ => {
                self.invoice_id = Some(invoice_id);
                Ok(())
            }
        }
    }

    /// Locks the payment and records where its money went
    pub fn confirm(
        &mut self,
        confirmed_by: ActorId,
        invoice_allocation: Option<Money>,
        fee_allocations: Vec<FeeAllocation>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.already_final());
        }
        self.status = PaymentStatus::Confirmed;
        self.confirmation = Some(ConfirmationRecord {
            confirmed_by,
            confirmed_at: now,
            invoice_allocation,
            fee_allocations,
        });
        Ok(())
    }

    /// Marks the payment voided; the caller reverses allocations in the same change set
    pub fn void(
        &mut self,
        reason: &str,
        voided_by: ActorId,
        reversed_invoice: Option<Money>,
        reversed_fees: Vec<FeeAllocation>,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        if self.status == PaymentStatus::Voided {
            return Err(self.already_final());
        }
        if reason.trim().is_empty() {
            return Err(BillingError::invalid("a void reason is required"));
        }
        self.status = PaymentStatus::Voided;
        self.void = Some(VoidRecord {
            reason: reason.trim().to_string(),
            voided_by,
            voided_at: now,
            reversed_invoice,
            reversed_fees,
        });
        Ok(())
    }

    /// Appends to the note log; allowed in every state
    pub fn add_note(&mut self, text: &str, author: ActorId, now: DateTime<Utc>) -> Result<(), BillingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BillingError::invalid("note text is required"));
        }
        self.notes.push(PaymentNote {
            text: text.to_string(),
            author,
            recorded_at: now,
        });
        Ok(())
    }

    pub fn ensure_confirmed(&self) -> Result<&ConfirmationRecord, BillingError> {
        match (&self.status, &self.confirmation) {
            (PaymentStatus::Confirmed, Some(record)) => Ok(record),
            _ => Err(BillingError::AlreadyFinal {
                entity: "Payment",
                id: self.reference.clone(),
                status: format!("{} (not Confirmed)", self.status.as_str()),
            }),
        }
    }

    fn already_final(&self) -> BillingError {
        BillingError::AlreadyFinal {
            entity: "Payment",
            id: self.reference.clone(),
            status: self.status.as_str().into(),
        }
    }
}

/// A linked correction to a confirmed payment's net amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAdjustment {
    pub id: AdjustmentId,
    pub payment_id: PaymentId,
    pub previous_adjustment_id: Option<AdjustmentId>,
    /// 1 for the first adjustment of a payment
    pub sequence: u32,
    pub previous_net: Money,
    pub new_amount: Money,
    pub delta: Money,
    /// Change to the invoice allocation, when the payment targets an invoice
    pub invoice_delta: Option<Money>,
    /// Signed changes to fee allocations
    pub fee_allocations: Vec<FeeAllocation>,
    pub reason: String,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl PaymentAdjustment {
    /// Starts the next link of a payment's adjustment chain
    ///
    /// `chain` must hold the payment's existing adjustments in sequence
    /// order. The allocation effect is filled in by the caller.
    pub fn next(
        payment: &Payment,
        chain: &[PaymentAdjustment],
        new_amount: Money,
        reason: &str,
        created_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        payment.ensure_confirmed()?;
        payment.amount.ensure_same_currency(&new_amount)?;
        if new_amount.is_negative() {
            return Err(BillingError::InvalidAmount(format!(
                "adjusted amount must not be negative, got {}",
                new_amount
            )));
        }
        if reason.trim().is_empty() {
            return Err(BillingError::invalid("an adjustment reason is required"));
        }
        let new_amount = new_amount.round_to_currency();
        let previous_net = net_amount(payment, chain);
        let delta = new_amount.checked_sub(&previous_net)?;
        if delta.is_zero() {
            return Err(BillingError::InvalidAmount(format!(
                "payment {} already nets to {}",
                payment.reference, new_amount
            )));
        }
        let previous = chain.last();
        Ok(Self {
            id: AdjustmentId::new_v7(),
            payment_id: payment.id,
            previous_adjustment_id: previous.map(|a| a.id),
            sequence: previous.map_or(1, |a| a.sequence + 1),
            previous_net,
            new_amount,
            delta,
            invoice_delta: None,
            fee_allocations: Vec::new(),
            reason: reason.trim().to_string(),
            created_by,
            created_at: now,
            version: 0,
        })
    }
}

/// The payment's amount after every adjustment in the chain
pub fn net_amount(payment: &Payment, chain: &[PaymentAdjustment]) -> Money {
    chain.last().map_or(payment.amount, |a| a.new_amount)
}

/// Net invoice allocation from confirmation plus adjustments
pub fn net_invoice_allocation(
    payment: &Payment,
    chain: &[PaymentAdjustment],
) -> Result<Option<Money>, BillingError> {
    let Some(base) = payment.confirmation.as_ref().and_then(|c| c.invoice_allocation) else {
        return Ok(None);
    };
    let mut net = base;
    for adjustment in chain {
        if let Some(delta) = adjustment.invoice_delta {
            net = net.checked_add(&delta)?;
        }
    }
    Ok(Some(net))
}

/// Net allocation per fee, in the order fees were first allocated
pub fn net_fee_allocations(
    payment: &Payment,
    chain: &[PaymentAdjustment],
) -> Result<Vec<FeeAllocation>, BillingError> {
    let mut order: Vec<StudentFeeId> = Vec::new();
    let mut totals: HashMap<StudentFeeId, Money> = HashMap::new();

    let confirmed = payment
        .confirmation
        .as_ref()
        .map(|c| c.fee_allocations.as_slice())
        .unwrap_or_default();
    let adjusted = chain.iter().flat_map(|a| a.fee_allocations.iter());

    for allocation in confirmed.iter().chain(adjusted) {
        match totals.get_mut(&allocation.student_fee_id) {
            Some(total) => *total = total.checked_add(&allocation.amount)?,
            None => {
                order.push(allocation.student_fee_id);
                totals.insert(allocation.student_fee_id, allocation.amount);
            }
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|id| {
            totals
                .get(&id)
                .filter(|m| !m.is_zero())
                .map(|amount| FeeAllocation { student_fee_id: id, amount: *amount })
        })
        .collect())
}

/// Spreads `amount` across fees in order, each up to its outstanding balance
///
/// Settled and terminal fees are skipped. Whatever is left after the last
/// fee is not allocated to any fee.
pub fn distribute_to_fees(amount: Money, fees: &[&StudentFee]) -> Result<Vec<FeeAllocation>, BillingError> {
    let mut remaining = amount;
    let mut allocations = Vec::new();
    for fee in fees {
        if !remaining.is_positive() {
            break;
        }
        if fee.status.is_terminal() {
            continue;
        }
        let outstanding = fee.amount_outstanding()?;
        if !outstanding.is_positive() {
            continue;
        }
        let share = remaining.min(&outstanding)?;
        allocations.push(FeeAllocation {
            student_fee_id: fee.id,
            amount: share,
        });
        remaining = remaining.checked_sub(&share)?;
    }
    Ok(allocations)
}

/// Takes `amount` back from existing fee allocations, latest first
pub fn withdraw_from_fees(amount: Money, held: &[FeeAllocation]) -> Result<Vec<FeeAllocation>, BillingError> {
    let mut remaining = amount;
    let mut withdrawals = Vec::new();
    for allocation in held.iter().rev() {
        if !remaining.is_positive() {
            break;
        }
        if !allocation.amount.is_positive() {
            continue;
        }
        let share = remaining.min(&allocation.amount)?;
        withdrawals.push(FeeAllocation {
            student_fee_id: allocation.student_fee_id,
            amount: share,
        });
        remaining = remaining.checked_sub(&share)?;
    }
    Ok(withdrawals)
}

/// One step in a payment's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuditEvent {
    Recorded { amount: Money },
    Confirmed { amount: Money },
    Adjusted { sequence: u32, delta: Money, new_amount: Money, reason: String },
    NoteAdded { text: String },
    Voided { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor: ActorId,
    pub event: AuditEvent,
}

/// A payment with its full correction history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAudit {
    /// The payment exactly as stored
    pub payment: Payment,
    /// Adjustments in creation order
    pub adjustments: Vec<PaymentAdjustment>,
    /// Every event, oldest first
    pub entries: Vec<AuditEntry>,
    /// Original amount plus every adjustment delta
    pub net_amount: Money,
    /// What the payment currently contributes; zero unless confirmed
    pub net_effect: Money,
}

impl PaymentAudit {
    pub fn build(payment: Payment, mut adjustments: Vec<PaymentAdjustment>) -> Result<Self, BillingError> {
        adjustments.sort_by_key(|a| a.sequence);

        let mut net = payment.amount;
        for adjustment in &adjustments {
            net = net.checked_add(&adjustment.delta)?;
        }
        if net != net_amount(&payment, &adjustments) {
            return Err(BillingError::InvariantViolation(format!(
                "adjustment chain of {} does not fold to its latest amount",
                payment.reference
            )));
        }

        let mut entries = vec![AuditEntry {
            at: payment.recorded_at,
            actor: payment.received_by,
            event: AuditEvent::Recorded { amount: payment.amount },
        }];
        if let Some(c) = &payment.confirmation {
            entries.push(AuditEntry {
                at: c.confirmed_at,
                actor: c.confirmed_by,
                event: AuditEvent::Confirmed { amount: payment.amount },
            });
        }
        entries.extend(adjustments.iter().map(|a| AuditEntry {
            at: a.created_at,
            actor: a.created_by,
            event: AuditEvent::Adjusted {
                sequence: a.sequence,
                delta: a.delta,
                new_amount: a.new_amount,
                reason: a.reason.clone(),
            },
        }));
        entries.extend(payment.notes.iter().map(|n| AuditEntry {
            at: n.recorded_at,
            actor: n.author,
            event: AuditEvent::NoteAdded { text: n.text.clone() },
        }));
        if let Some(v) = &payment.void {
            entries.push(AuditEntry {
                at: v.voided_at,
                actor: v.voided_by,
                event: AuditEvent::Voided { reason: v.reason.clone() },
            });
        }
        // stable: ties keep recorded → confirmed → adjusted → note → void order
        entries.sort_by_key(|e| e.at);

        let net_effect = if payment.status == PaymentStatus::Confirmed {
            net
        } else {
            Money::zero(payment.currency())
        };

        Ok(Self {
            payment,
            adjustments,
            entries,
            net_amount: net,
            net_effect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn usd(v: Decimal) -> Money {
        Money::new(v, Currency::USD)
    }

    fn pending(amount: Decimal) -> Payment {
        Payment::record(
            NewPayment {
                student_id: StudentId::new(),
                invoice_id: Some(InvoiceId::new()),
                student_fee_id: None,
                amount: usd(amount),
                method: PaymentMethod::Cash,
                payment_date: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
                paid_for: Some("Tuition".into()),
            },
            "PAY-2026-00001".into(),
            ActorId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_record_rejects_non_positive_amount() {
        let result = Payment::record(
            NewPayment {
                student_id: StudentId::new(),
                invoice_id: Some(InvoiceId::new()),
                student_fee_id: None,
                amount: usd(dec!(0)),
                method: PaymentMethod::Cash,
                payment_date: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
                paid_for: None,
            },
            "PAY-2026-00002".into(),
            ActorId::new(),
            Utc::now(),
        );
        assert!(matches!(result, Err(BillingError::InvalidAmount(_))));
    }

    #[test]
    fn test_record_requires_a_target() {
        let result = Payment::record(
            NewPayment {
                student_id: StudentId::new(),
                invoice_id: None,
                student_fee_id: None,
                amount: usd(dec!(10)),
                method: PaymentMethod::Card,
                payment_date: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap(),
                paid_for: None,
            },
            "PAY-2026-00003".into(),
            ActorId::new(),
            Utc::now(),
        );
        assert!(matches!(result, Err(BillingError::MissingReference(_))));
    }

    #[test]
    fn test_state_machine() {
        let mut p = pending(dec!(100));
        p.confirm(ActorId::new(), Some(usd(dec!(100))), vec![], Utc::now()).unwrap();
        assert_eq!(p.status(), PaymentStatus::Confirmed);
        assert!(matches!(
            p.confirm(ActorId::new(), None, vec![], Utc::now()),
            Err(BillingError::AlreadyFinal { .. })
        ));
        p.void("Wrong Amount", ActorId::new(), Some(usd(dec!(100))), vec![], Utc::now())
            .unwrap();
        assert_eq!(p.status(), PaymentStatus::Voided);
        assert_eq!(p.void_record().unwrap().reason, "Wrong Amount");
        assert!(p.void("Again", ActorId::new(), None, vec![], Utc::now()).is_err());
        assert_eq!(p.amount().amount(), dec!(100));
    }

    #[test]
    fn test_bind_invoice_only_while_pending() {
        let mut p = pending(dec!(50));
        let bound = p.invoice_id().unwrap();
        p.bind_invoice(bound).unwrap();
        assert!(matches!(p.bind_invoice(InvoiceId::new()), Err(BillingError::InvalidRequest(_))));

        p.confirm(ActorId::new(), Some(usd(dec!(50))), vec![], Utc::now()).unwrap();
        assert!(matches!(p.bind_invoice(bound), Err(BillingError::AlreadyFinal { .. })));
    }

    #[test]
    fn test_notes_are_append_only_in_any_state() {
        let mut p = pending(dec!(100));
        p.add_note("Receipt 881", ActorId::new(), Utc::now()).unwrap();
        p.void("Duplicate", ActorId::new(), None, vec![], Utc::now()).unwrap();
        p.add_note("Refunded in cash", ActorId::new(), Utc::now()).unwrap();
        assert_eq!(p.notes().len(), 2);
        assert!(p.add_note("   ", ActorId::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_adjustment_chain_links_and_folds() {
        let mut p = pending(dec!(100));
        p.confirm(ActorId::new(), Some(usd(dec!(100))), vec![], Utc::now()).unwrap();

        let first = PaymentAdjustment::next(&p, &[], usd(dec!(80)), "Bank fee", ActorId::new(), Utc::now())
            .unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.delta.amount(), dec!(-20));
        assert!(first.previous_adjustment_id.is_none());

        let chain = vec![first.clone()];
        let second = PaymentAdjustment::next(&p, &chain, usd(dec!(90)), "Partial refund reversed", ActorId::new(), Utc::now())
            .unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.previous_adjustment_id, Some(first.id));
        assert_eq!(second.previous_net.amount(), dec!(80));
        assert_eq!(second.delta.amount(), dec!(10));

        let audit = PaymentAudit::build(p.clone(), vec![second, first]).unwrap();
        assert_eq!(audit.adjustments[0].sequence, 1);
        assert_eq!(audit.net_amount.amount(), dec!(90));
        assert_eq!(audit.payment, p);
    }

    #[test]
    fn test_adjustment_requires_confirmed_payment() {
        let p = pending(dec!(100));
        assert!(PaymentAdjustment::next(&p, &[], usd(dec!(50)), "Fix", ActorId::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_withdraw_takes_latest_allocation_first() {
        let a = StudentFeeId::new();
        let b = StudentFeeId::new();
        let held = vec![
            FeeAllocation { student_fee_id: a, amount: usd(dec!(60)) },
            FeeAllocation { student_fee_id: b, amount: usd(dec!(40)) },
        ];
        let taken = withdraw_from_fees(usd(dec!(50)), &held).unwrap();
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].student_fee_id, b);
        assert_eq!(taken[0].amount.amount(), dec!(40));
        assert_eq!(taken[1].amount.amount(), dec!(10));
    }
}
