//! Invoice management
//!
//! An invoice bundles a student's fees (and free-form supply, adjustment or
//! carryover lines) into one bill. Line amounts are snapshots taken when the
//! line is added and are never rewritten; later changes to a fee go on a new
//! line.
//!
//! Totals and status are recomputed from lines, allocations and discounts
//! after every mutation by [`Invoice::recalculate_status`].

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{ActorId, Currency, InvoiceId, InvoiceLineId, Money, Rate, StudentFeeId, StudentId, TermId};

use crate::error::BillingError;

/// Invoice status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceStatus {
    /// Nothing allocated yet
    Open,
    /// Some payment received
    PartiallyPaid,
    /// Nothing outstanding
    Paid,
    /// Withdrawn before any payment
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "Open",
            InvoiceStatus::PartiallyPaid => "PartiallyPaid",
            InvoiceStatus::Paid => "Paid",
            InvoiceStatus::Cancelled => "Cancelled",
        }
    }
}

/// What an invoice line bills for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineItemKind {
    /// Snapshot of a student fee
    Fee { student_fee_id: StudentFeeId },
    /// Books, uniforms and other supplies
    Supply,
    /// Correcting line; may be negative
    Adjustment,
    /// Balance brought forward from an earlier term
    Carryover { source_term: TermId },
    /// Late fee charged on a billed fee after the invoice was issued
    LateFee { student_fee_id: StudentFeeId },
    /// Negative line closing out a balance moved to a later term's invoice
    CarriedForward { destination_term: TermId },
}

/// A line to be added to an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub kind: LineItemKind,
    pub description: String,
    pub amount: Money,
}

impl LineItem {
    pub fn fee(student_fee_id: StudentFeeId, description: impl Into<String>, amount: Money) -> Self {
        Self {
            kind: LineItemKind::Fee { student_fee_id },
            description: description.into(),
            amount,
        }
    }

    pub fn supply(description: impl Into<String>, amount: Money) -> Self {
        Self {
            kind: LineItemKind::Supply,
            description: description.into(),
            amount,
        }
    }

    pub fn adjustment(description: impl Into<String>, amount: Money) -> Self {
        Self {
            kind: LineItemKind::Adjustment,
            description: description.into(),
            amount,
        }
    }

    pub fn carryover(source_term: TermId, amount: Money) -> Self {
        Self {
            kind: LineItemKind::Carryover { source_term },
            description: "Carryover Balance".into(),
            amount,
        }
    }

    pub fn late_fee(student_fee_id: StudentFeeId, fee_name: &str, amount: Money) -> Self {
        Self {
            kind: LineItemKind::LateFee { student_fee_id },
            description: format!("Late fee: {}", fee_name),
            amount,
        }
    }

    /// Credits `amount` off the invoice; the same balance is billed in `destination_term`
    pub fn carried_forward(destination_term: TermId, amount: Money) -> Self {
        Self {
            kind: LineItemKind::CarriedForward { destination_term },
            description: "Carried forward".into(),
            amount: -amount,
        }
    }
}

/// A line on an invoice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: InvoiceLineId,
    pub kind: LineItemKind,
    pub description: String,
    pub amount: Money,
    pub added_at: DateTime<Utc>,
}

impl InvoiceLine {
    pub fn student_fee_id(&self) -> Option<StudentFeeId> {
        match self.kind {
            LineItemKind::Fee { student_fee_id } => Some(student_fee_id),
            _ => None,
        }
    }
}

/// How a discount is expressed by the person applying it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountSpec {
    /// Percentage of the unpaid portion
    Percent(Decimal),
    /// Fixed amount
    Amount(Money),
}

/// A discount applied to an invoice, with its resolved amount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDiscount {
    pub spec: DiscountSpec,
    pub amount: Money,
    pub reason: String,
    pub applied_by: ActorId,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub reason: String,
    pub cancelled_by: ActorId,
    pub cancelled_at: DateTime<Utc>,
}

/// A bill issued to a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    /// Human-readable number, e.g. `INV-2026-00001`
    pub invoice_number: String,
    pub student_id: StudentId,
    pub term_id: Option<TermId>,
    pub currency: Currency,
    pub issue_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub discounts: Vec<InvoiceDiscount>,
    pub amount_total: Money,
    /// Net confirmed allocations, including adjustments
    pub amount_allocated: Money,
    pub amount_outstanding: Money,
    pub status: InvoiceStatus,
    pub cancellation: Option<CancellationRecord>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Totals derived from an invoice's lines, allocations and discounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceTotals {
    pub total: Money,
    pub discounted: Money,
    pub outstanding: Money,
    pub status: InvoiceStatus,
}

/// Computes totals and status without touching the invoice
///
/// A negative outstanding is reported as an invariant violation; it is never
/// clamped.
pub fn recalculate_status(invoice: &Invoice) -> Result<InvoiceTotals, BillingError> {
    let total = Money::sum(invoice.lines.iter().map(|l| &l.amount), invoice.currency)?;
    let discounted = Money::sum(invoice.discounts.iter().map(|d| &d.amount), invoice.currency)?;
    let outstanding = total
        .checked_sub(&invoice.amount_allocated)?
        .checked_sub(&discounted)?;

    if outstanding.is_negative() {
        return Err(BillingError::InvariantViolation(format!(
            "invoice {} outstanding would be {} (total {}, allocated {}, discounts {})",
            invoice.invoice_number, outstanding, total, invoice.amount_allocated, discounted
        )));
    }
    if invoice.amount_allocated.is_negative() {
        return Err(BillingError::InvariantViolation(format!(
            "invoice {} has negative allocations {}",
            invoice.invoice_number, invoice.amount_allocated
        )));
    }

    let status = if invoice.status == InvoiceStatus::Cancelled {
        InvoiceStatus::Cancelled
    } else if outstanding.is_zero() {
        InvoiceStatus::Paid
    } else if invoice.amount_allocated.is_positive() {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Open
    };

    Ok(InvoiceTotals {
        total,
        discounted,
        outstanding,
        status,
    })
}

impl Invoice {
    /// Creates an invoice with its initial lines
    pub fn new(
        invoice_number: String,
        student_id: StudentId,
        term_id: Option<TermId>,
        currency: Currency,
        lines: Vec<LineItem>,
        created_by: ActorId,
        issue_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        if lines.is_empty() {
            return Err(BillingError::invalid("an invoice needs at least one line"));
        }
        let mut invoice = Self {
            id: InvoiceId::new_v7(),
            invoice_number,
            student_id,
            term_id,
            currency,
            issue_date,
            lines: Vec::with_capacity(lines.len()),
            discounts: Vec::new(),
            amount_total: Money::zero(currency),
            amount_allocated: Money::zero(currency),
            amount_outstanding: Money::zero(currency),
            status: InvoiceStatus::Open,
            cancellation: None,
            created_by,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        for item in lines {
            invoice.push_line(item, now)?;
        }
        invoice.recalculate()?;
        Ok(invoice)
    }

    /// Adds a line while the invoice is still collecting payment
    pub fn add_line(&mut self, item: LineItem, now: DateTime<Utc>) -> Result<&InvoiceLine, BillingError> {
        if !self.is_collecting() {
            return Err(BillingError::InvoiceClosed {
                invoice: self.invoice_number.clone(),
                status: self.status.as_str().into(),
            });
        }
        self.push_line(item, now)?;
        if let Err(err) = self.recalculate() {
            self.lines.pop();
            return Err(err);
        }
        self.updated_at = now;
        self.lines
            .last()
            .ok_or_else(|| BillingError::InvariantViolation("line vanished after insert".into()))
    }

    /// Discounts the still-unpaid portion
    pub fn apply_discount(
        &mut self,
        spec: DiscountSpec,
        reason: &str,
        applied_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<Money, BillingError> {
        if !self.is_collecting() {
            return Err(BillingError::InvoiceClosed {
                invoice: self.invoice_number.clone(),
                status: self.status.as_str().into(),
            });
        }
        if reason.trim().is_empty() {
            return Err(BillingError::invalid("a discount reason is required"));
        }

        let amount = match spec {
            DiscountSpec::Percent(percent) => {
                Rate::from_percentage(percent)?.apply(&self.amount_outstanding)
            }
            DiscountSpec::Amount(amount) => {
                self.amount_outstanding.ensure_same_currency(&amount)?;
                amount.round_to_currency()
            }
        };
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "discount must be positive, got {}",
                amount
            )));
        }
        if amount.amount() > self.amount_outstanding.amount() {
            return Err(BillingError::DiscountExceedsOutstanding {
                invoice: self.invoice_number.clone(),
                discount: amount.to_string(),
                outstanding: self.amount_outstanding.to_string(),
            });
        }

        self.discounts.push(InvoiceDiscount {
            spec,
            amount,
            reason: reason.trim().to_string(),
            applied_by,
            applied_at: now,
        });
        self.recalculate()?;
        self.updated_at = now;
        Ok(amount)
    }

    /// Posts an adjustment line for money that moved on a billed fee outside this invoice
    ///
    /// Unlike [`Invoice::add_line`] this also reopens a paid invoice. A credit
    /// larger than the outstanding balance is refused.
    pub fn post_correction(&mut self, item: LineItem, now: DateTime<Utc>) -> Result<(), BillingError> {
        if !self.is_live() {
            return Err(BillingError::InvoiceClosed {
                invoice: self.invoice_number.clone(),
                status: self.status.as_str().into(),
            });
        }
        self.ensure_not_carried_forward()?;
        if item.kind != LineItemKind::Adjustment {
            return Err(BillingError::invalid("corrections are posted as adjustment lines"));
        }
        let credit = -item.amount;
        if credit.amount() > self.amount_outstanding.amount() {
            return Err(BillingError::OverAllocation {
                target: self.invoice_number.clone(),
                requested: credit.to_string(),
                outstanding: self.amount_outstanding.to_string(),
            });
        }
        self.push_line(item, now)?;
        if let Err(err) = self.recalculate() {
            self.lines.pop();
            return Err(err);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Records a confirmed payment (or upward adjustment) against the invoice
    pub fn allocate(&mut self, amount: Money, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.amount_outstanding.ensure_same_currency(&amount)?;
        if self.status == InvoiceStatus::Cancelled {
            return Err(BillingError::InvoiceClosed {
                invoice: self.invoice_number.clone(),
                status: self.status.as_str().into(),
            });
        }
        if amount.amount() > self.amount_outstanding.amount() {
            return Err(BillingError::OverAllocation {
                target: self.invoice_number.clone(),
                requested: amount.to_string(),
                outstanding: self.amount_outstanding.to_string(),
            });
        }
        self.amount_allocated = self.amount_allocated.checked_add(&amount)?;
        self.recalculate()?;
        self.updated_at = now;
        Ok(())
    }

    /// Takes back an allocation on void or downward adjustment
    ///
    /// Refused once the balance was carried forward: reopening it would bill
    /// the same money in two terms.
    pub fn deallocate(&mut self, amount: Money, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.ensure_not_carried_forward()?;
        self.amount_allocated.ensure_same_currency(&amount)?;
        if amount.amount() > self.amount_allocated.amount() {
            return Err(BillingError::InvariantViolation(format!(
                "deallocating {} from invoice {} which has only {} allocated",
                amount, self.invoice_number, self.amount_allocated
            )));
        }
        self.amount_allocated = self.amount_allocated.checked_sub(&amount)?;
        self.recalculate()?;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, reason: &str, cancelled_by: ActorId, now: DateTime<Utc>) -> Result<(), BillingError> {
        if self.status == InvoiceStatus::Cancelled {
            return Err(BillingError::AlreadyFinal {
                entity: "Invoice",
                id: self.invoice_number.clone(),
                status: self.status.as_str().into(),
            });
        }
        self.ensure_not_carried_forward()?;
        if !self.amount_allocated.is_zero() {
            return Err(BillingError::InvoiceHasPayments(self.invoice_number.clone()));
        }
        if reason.trim().is_empty() {
            return Err(BillingError::invalid("a cancellation reason is required"));
        }
        self.status = InvoiceStatus::Cancelled;
        self.cancellation = Some(CancellationRecord {
            reason: reason.trim().to_string(),
            cancelled_by,
            cancelled_at: now,
        });
        self.recalculate()?;
        self.updated_at = now;
        Ok(())
    }

    /// Fee ids billed on this invoice, in line order
    pub fn fee_ids(&self) -> Vec<StudentFeeId> {
        self.lines.iter().filter_map(InvoiceLine::student_fee_id).collect()
    }

    pub fn bills_fee(&self, fee_id: StudentFeeId) -> bool {
        self.lines.iter().any(|l| l.student_fee_id() == Some(fee_id))
    }

    pub fn is_live(&self) -> bool {
        self.status != InvoiceStatus::Cancelled
    }

    /// Whether the invoice still accepts lines and discounts
    pub fn is_collecting(&self) -> bool {
        matches!(self.status, InvoiceStatus::Open | InvoiceStatus::PartiallyPaid)
    }

    /// The term this invoice's balance was moved to, if any
    pub fn carried_forward_to(&self) -> Option<TermId> {
        self.lines.iter().find_map(|l| match l.kind {
            LineItemKind::CarriedForward { destination_term } => Some(destination_term),
            _ => None,
        })
    }

    fn ensure_not_carried_forward(&self) -> Result<(), BillingError> {
        match self.carried_forward_to() {
            Some(term) => Err(BillingError::InvoiceClosed {
                invoice: self.invoice_number.clone(),
                status: format!("carried forward to term {}", term),
            }),
            None => Ok(()),
        }
    }

    /// Re-derives totals and status from the invoice's own records
    pub fn recalculate(&mut self) -> Result<(), BillingError> {
        let totals = recalculate_status(self)?;
        self.amount_total = totals.total;
        self.amount_outstanding = totals.outstanding;
        self.status = totals.status;
        Ok(())
    }

    fn push_line(&mut self, item: LineItem, now: DateTime<Utc>) -> Result<(), BillingError> {
        if item.amount.currency() != self.currency {
            return Err(BillingError::CurrencyMismatch {
                expected: self.currency.to_string(),
                actual: item.amount.currency().to_string(),
            });
        }
        if item.description.trim().is_empty() {
            return Err(BillingError::invalid("line description is required"));
        }
        let negative_allowed = matches!(item.kind, LineItemKind::Adjustment | LineItemKind::CarriedForward { .. });
        if item.amount.is_zero() || (item.amount.is_negative() && !negative_allowed) {
            return Err(BillingError::InvalidAmount(format!(
                "line '{}' has amount {}",
                item.description, item.amount
            )));
        }
        self.lines.push(InvoiceLine {
            id: InvoiceLineId::new_v7(),
            kind: item.kind,
            description: item.description.trim().to_string(),
            amount: item.amount.round_to_currency(),
            added_at: now,
        });
        Ok(())
    }
}
