//! Student fee ledger
//!
//! A `StudentFee` is one obligation owed by one student. Its terms (amount,
//! discounts, due date, late-fee rule) are fixed when it is assigned; after
//! that it only moves through allocation, reversal, late-fee accrual, waiver
//! and cancellation.
//!
//! # Balance
//!
//! ```text
//! final        = original - sum(discounts)
//! outstanding  = final + late_fee_applied - amount_paid      (>= 0)
//! ```
//!
//! Both are derived on read rather than stored. A waived, cancelled or
//! carried-forward fee owes nothing on this ledger. Discounts include the
//! share of any invoice-level discount spread onto the fee.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::temporal::{add_days, sub_days};
use core_kernel::{ActorId, Currency, EnrollmentId, FeeTemplateId, Money, Rate, StudentFeeId, StudentId, TermId};

use crate::catalog::{FeeKind, FeeTemplate, TemplateStatus};
use crate::error::BillingError;

/// Lifecycle status of a student fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeStatus {
    /// Nothing paid yet, not past grace
    Pending,
    /// Partly paid
    Partial,
    /// Nothing outstanding
    Paid,
    /// Unpaid past the grace period
    Overdue,
    /// Forgiven in full
    Waived,
    /// Withdrawn before any payment
    Cancelled,
    /// Balance moved onto a later term's carryover invoice
    CarriedForward,
}

impl FeeStatus {
    /// Waived, cancelled and carried-forward fees never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, FeeStatus::Waived | FeeStatus::Cancelled | FeeStatus::CarriedForward)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStatus::Pending => "Pending",
            FeeStatus::Partial => "Partial",
            FeeStatus::Paid => "Paid",
            FeeStatus::Overdue => "Overdue",
            FeeStatus::Waived => "Waived",
            FeeStatus::Cancelled => "Cancelled",
            FeeStatus::CarriedForward => "CarriedForward",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountSource {
    Sibling,
    EarlyPayment,
    Manual,
    /// Share of a discount applied to the invoice billing this fee
    Invoice,
}

/// One component of a fee's discount, kept for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountLine {
    pub source: DiscountSource,
    pub percent: Option<Decimal>,
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualDiscount {
    pub amount: Money,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiverRecord {
    pub reason: String,
    pub waived_by: ActorId,
    pub waived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarryForwardRecord {
    pub amount: Money,
    pub destination_term: TermId,
    pub carried_at: DateTime<Utc>,
}

/// A one-off fee that does not come from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdHocFee {
    pub name: String,
    pub kind: FeeKind,
    pub amount: Money,
    pub due_date: NaiveDate,
    pub grace_days: u32,
    pub late_fee_amount: Option<Money>,
}

/// Where a new fee's terms come from
#[derive(Debug, Clone, Copy)]
pub enum FeeSource<'a> {
    Template(&'a FeeTemplate),
    AdHoc(&'a AdHocFee),
}

/// Per-assignment facts that influence the fee's terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentContext {
    pub enrollment_id: Option<EnrollmentId>,
    pub term_id: Option<TermId>,
    pub trigger_date: NaiveDate,
    pub has_enrolled_sibling: bool,
    pub manual_discount: Option<ManualDiscount>,
}

/// A single obligation owed by a student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentFee {
    pub id: StudentFeeId,
    pub student_id: StudentId,
    pub enrollment_id: Option<EnrollmentId>,
    pub term_id: Option<TermId>,
    /// None for ad-hoc fees
    pub template_id: Option<FeeTemplateId>,
    pub name: String,
    pub kind: FeeKind,
    pub original_amount: Money,
    pub discounts: Vec<DiscountLine>,
    pub due_date: NaiveDate,
    pub grace_days: u32,
    pub late_fee_amount: Money,
    pub late_fee_applied: Money,
    pub late_fee_applied_at: Option<DateTime<Utc>>,
    pub status: FeeStatus,
    pub amount_paid: Money,
    /// Set on first allocation and never cleared
    pub has_allocations: bool,
    pub waiver: Option<WaiverRecord>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub carried_forward: Option<CarryForwardRecord>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl StudentFee {
    /// Creates a fee from a template or an ad-hoc description
    ///
    /// Discounts are computed on the original amount in a fixed order and
    /// summed, never compounded:
    /// 1. sibling discount, when the student has an enrolled sibling
    /// 2. early-payment discount, when `today <= due_date - window_days`
    /// 3. the manual discount from the context
    ///
    /// Each component is rounded to the currency's precision.
    pub fn assign(
        student_id: StudentId,
        source: FeeSource<'_>,
        context: &AssignmentContext,
        created_by: ActorId,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Self, BillingError> {
        let mut discounts = Vec::new();

        let (template_id, name, kind, original, due_date, grace_days, late_fee_amount) = match source {
            FeeSource::Template(template) => {
                if template.status != TemplateStatus::Active {
                    return Err(BillingError::invalid(format!(
                        "template {} is inactive",
                        template.id
                    )));
                }
                let due_date = add_days(context.trigger_date, template.due_days_after_trigger)?;
                let original = template.base_amount;

                if context.has_enrolled_sibling && !template.sibling_discount_percent.is_zero() {
                    let rate = Rate::from_percentage(template.sibling_discount_percent)?;
                    discounts.push(DiscountLine {
                        source: DiscountSource::Sibling,
                        percent: Some(template.sibling_discount_percent),
                        amount: rate.apply(&original),
                        reason: format!("Sibling discount {}", rate),
                    });
                }
                if let Some(rule) = template.early_payment.filter(|r| !r.percent.is_zero()) {
                    if today <= sub_days(due_date, rule.window_days)? {
                        let rate = Rate::from_percentage(rule.percent)?;
                        discounts.push(DiscountLine {
                            source: DiscountSource::EarlyPayment,
                            percent: Some(rule.percent),
                            amount: rate.apply(&original),
                            reason: format!("Early payment discount {}", rate),
                        });
                    }
                }

                let (grace, late) = match template.late_fee {
                    Some(rule) => (rule.grace_days, rule.amount),
                    None => (0, Money::zero(original.currency())),
                };
                (
                    Some(template.id),
                    template.name.clone(),
                    template.kind,
                    original,
                    due_date,
                    grace,
                    late,
                )
            }
            FeeSource::AdHoc(fee) => {
                if fee.name.trim().is_empty() {
                    return Err(BillingError::invalid("fee name is required"));
                }
                if !fee.amount.is_positive() {
                    return Err(BillingError::InvalidAmount(format!(
                        "fee amount must be positive, got {}",
                        fee.amount
                    )));
                }
                let late = fee.late_fee_amount.unwrap_or_else(|| Money::zero(fee.amount.currency()));
                fee.amount.ensure_same_currency(&late)?;
                if late.is_negative() {
                    return Err(BillingError::InvalidAmount("late fee must not be negative".into()));
                }
                (
                    None,
                    fee.name.trim().to_string(),
                    fee.kind,
                    fee.amount,
                    fee.due_date,
                    fee.grace_days,
                    late,
                )
            }
        };

        if let Some(manual) = &context.manual_discount {
            original.ensure_same_currency(&manual.amount)?;
            if !manual.amount.is_positive() {
                return Err(BillingError::InvalidAmount(format!(
                    "manual discount must be positive, got {}",
                    manual.amount
                )));
            }
            discounts.push(DiscountLine {
                source: DiscountSource::Manual,
                percent: None,
                amount: manual.amount.round_to_currency(),
                reason: manual.reason.clone(),
            });
        }

        let fee = Self {
            id: StudentFeeId::new_v7(),
            student_id,
            enrollment_id: context.enrollment_id,
            term_id: context.term_id,
            template_id,
            name,
            kind,
            original_amount: original,
            discounts,
            due_date,
            grace_days,
            late_fee_amount,
            late_fee_applied: Money::zero(original.currency()),
            late_fee_applied_at: None,
            status: FeeStatus::Pending,
            amount_paid: Money::zero(original.currency()),
            has_allocations: false,
            waiver: None,
            cancelled_at: None,
            carried_forward: None,
            created_by,
            created_at: now,
            updated_at: now,
            version: 0,
        };

        let final_amount = fee.final_amount()?;
        if !final_amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "discounts reduce {} to {}",
                fee.original_amount, final_amount
            )));
        }
        Ok(fee)
    }

    pub fn currency(&self) -> Currency {
        self.original_amount.currency()
    }

    pub fn discount_amount(&self) -> Result<Money, BillingError> {
        Ok(Money::sum(self.discounts.iter().map(|d| &d.amount), self.currency())?)
    }

    /// Discount reasons joined in application order
    pub fn discount_reason(&self) -> Option<String> {
        if self.discounts.is_empty() {
            return None;
        }
        Some(
            self.discounts
                .iter()
                .map(|d| d.reason.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn final_amount(&self) -> Result<Money, BillingError> {
        Ok(self.original_amount.checked_sub(&self.discount_amount()?)?)
    }

    /// What the fee still owes; zero once waived or cancelled
    pub fn amount_outstanding(&self) -> Result<Money, BillingError> {
        if self.status.is_terminal() {
            return Ok(Money::zero(self.currency()));
        }
        let owed = self
            .final_amount()?
            .checked_add(&self.late_fee_applied)?
            .checked_sub(&self.amount_paid)?;
        if owed.is_negative() {
            return Err(BillingError::InvariantViolation(format!(
                "fee {} outstanding is negative ({})",
                self.id, owed
            )));
        }
        Ok(owed)
    }

    /// Last day before the fee counts as late
    pub fn grace_deadline(&self) -> Result<NaiveDate, BillingError> {
        Ok(add_days(self.due_date, self.grace_days)?)
    }

    pub fn is_past_grace(&self, as_of: NaiveDate) -> Result<bool, BillingError> {
        Ok(as_of > self.grace_deadline()?)
    }

    /// Applies part of a confirmed payment to this fee
    pub fn allocate(&mut self, amount: Money, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.ensure_open("allocate to")?;
        self.original_amount.ensure_same_currency(&amount)?;
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "allocation must be positive, got {}",
                amount
            )));
        }
        let outstanding = self.amount_outstanding()?;
        if amount.amount() > outstanding.amount() {
            return Err(BillingError::OverAllocation {
                target: self.id.to_string(),
                requested: amount.to_string(),
                outstanding: outstanding.to_string(),
            });
        }

        self.amount_paid = self.amount_paid.checked_add(&amount)?;
        self.has_allocations = true;
        self.status = if self.amount_outstanding()?.is_zero() {
            FeeStatus::Paid
        } else {
            FeeStatus::Partial
        };
        self.updated_at = now;
        Ok(())
    }

    /// Takes back an allocation when a payment is voided or adjusted down
    pub fn reverse_allocation(
        &mut self,
        amount: Money,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.ensure_open("reverse an allocation on")?;
        self.original_amount.ensure_same_currency(&amount)?;
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "reversal must be positive, got {}",
                amount
            )));
        }
        if amount.amount() > self.amount_paid.amount() {
            return Err(BillingError::InvariantViolation(format!(
                "reversing {} from fee {} which has only {} paid",
                amount, self.id, self.amount_paid
            )));
        }

        self.amount_paid = self.amount_paid.checked_sub(&amount)?;
        self.status = if self.amount_outstanding()?.is_zero() {
            FeeStatus::Paid
        } else if self.is_past_grace(today)? {
            FeeStatus::Overdue
        } else if self.amount_paid.is_positive() {
            FeeStatus::Partial
        } else {
            FeeStatus::Pending
        };
        self.updated_at = now;
        Ok(())
    }

    /// Takes this fee's share of an invoice-level discount
    pub fn apply_invoice_discount(
        &mut self,
        amount: Money,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.ensure_open("discount")?;
        self.original_amount.ensure_same_currency(&amount)?;
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "discount must be positive, got {}",
                amount
            )));
        }
        let outstanding = self.amount_outstanding()?;
        if amount.amount() > outstanding.amount() {
            return Err(BillingError::DiscountExceedsOutstanding {
                invoice: self.id.to_string(),
                discount: amount.to_string(),
                outstanding: outstanding.to_string(),
            });
        }

        self.discounts.push(DiscountLine {
            source: DiscountSource::Invoice,
            percent: None,
            amount,
            reason: reason.trim().to_string(),
        });
        if self.amount_outstanding()?.is_zero() {
            self.status = FeeStatus::Paid;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Closes the fee because its balance is now billed in `destination_term`
    ///
    /// Returns the amount moved.
    pub fn carry_forward(&mut self, destination_term: TermId, now: DateTime<Utc>) -> Result<Money, BillingError> {
        self.ensure_open("carry forward")?;
        let amount = self.amount_outstanding()?;
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount(format!(
                "fee {} has nothing outstanding to carry forward",
                self.id
            )));
        }
        self.status = FeeStatus::CarriedForward;
        self.carried_forward = Some(CarryForwardRecord {
            amount,
            destination_term,
            carried_at: now,
        });
        self.updated_at = now;
        Ok(amount)
    }

    /// Charges the late fee once the grace period has passed
    ///
    /// Returns `false` without changing anything when the fee is settled,
    /// terminal, still within grace, or already charged.
    pub fn accrue_late_fee(&mut self, as_of: NaiveDate, now: DateTime<Utc>) -> Result<bool, BillingError> {
        if self.status.is_terminal() || self.status == FeeStatus::Paid {
            return Ok(false);
        }
        if self.late_fee_applied_at.is_some() || !self.is_past_grace(as_of)? {
            return Ok(false);
        }

        self.late_fee_applied = self.late_fee_applied.checked_add(&self.late_fee_amount)?;
        self.late_fee_applied_at = Some(now);
        if !self.amount_outstanding()?.is_zero() {
            self.status = FeeStatus::Overdue;
        }
        self.updated_at = now;
        Ok(true)
    }

    /// Forgives the whole fee; only untouched fees can be waived
    pub fn waive(
        &mut self,
        reason: &str,
        waived_by: ActorId,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        let refuse = |why: String| BillingError::CannotWaive {
            fee: self.id.to_string(),
            reason: why,
        };
        if reason.trim().is_empty() {
            return Err(BillingError::invalid("a waiver reason is required"));
        }
        if self.status.is_terminal() {
            return Err(refuse(format!("fee is already {}", self.status.as_str())));
        }
        if self.amount_paid.is_positive() {
            return Err(refuse(format!(
                "{} has been paid; use a discount for partial relief",
                self.amount_paid
            )));
        }

        self.status = FeeStatus::Waived;
        self.waiver = Some(WaiverRecord {
            reason: reason.trim().to_string(),
            waived_by,
            waived_at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Deletion and cancellation are refused once money has touched the fee
    pub fn ensure_deletable(&self) -> Result<(), BillingError> {
        if self.has_allocations {
            return Err(BillingError::HasPayments(self.id.to_string()));
        }
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.ensure_deletable()?;
        if self.status.is_terminal() {
            return Err(BillingError::AlreadyFinal {
                entity: "StudentFee",
                id: self.id.to_string(),
                status: self.status.as_str().into(),
            });
        }
        self.status = FeeStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> Result<(), BillingError> {
        if self.status.is_terminal() {
            return Err(BillingError::AlreadyFinal {
                entity: "StudentFee",
                id: format!("{} (cannot {})", self.id, action),
                status: self.status.as_str().into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ApplicabilityScope, EarlyPaymentRule, LateFeeRule, NewFeeTemplate};
    use core_kernel::FeeCategoryId;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn usd(v: Decimal) -> Money {
        Money::new(v, Currency::USD)
    }

    fn template(sibling: Decimal, early: Option<EarlyPaymentRule>) -> FeeTemplate {
        FeeTemplate::create(
            NewFeeTemplate {
                category_id: FeeCategoryId::new(),
                name: "Tuition".into(),
                kind: FeeKind::Tuition,
                base_amount: usd(dec!(500)),
                scope: ApplicabilityScope::All,
                due_days_after_trigger: 7,
                late_fee: Some(LateFeeRule { grace_days: 3, amount: usd(dec!(25)) }),
                early_payment: early,
                sibling_discount_percent: sibling,
                effective_date: d(2026, 1, 1),
                expiry_date: None,
            },
            ActorId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    fn context(sibling: bool, manual: Option<ManualDiscount>) -> AssignmentContext {
        AssignmentContext {
            enrollment_id: None,
            term_id: None,
            trigger_date: d(2026, 2, 1),
            has_enrolled_sibling: sibling,
            manual_discount: manual,
        }
    }

    fn assign(t: &FeeTemplate, ctx: &AssignmentContext, today: NaiveDate) -> StudentFee {
        StudentFee::assign(StudentId::new(), FeeSource::Template(t), ctx, ActorId::new(), today, Utc::now())
            .unwrap()
    }

    #[test]
    fn test_sibling_discount_applies_to_original() {
        let fee = assign(&template(dec!(10), None), &context(true, None), d(2026, 2, 1));
        assert_eq!(fee.due_date, d(2026, 2, 8));
        assert_eq!(fee.final_amount().unwrap().amount(), dec!(450));
        assert_eq!(fee.amount_outstanding().unwrap().amount(), dec!(450));
        assert_eq!(fee.status, FeeStatus::Pending);
    }

    #[test]
    fn test_discounts_are_additive_not_compounded() {
        let early = EarlyPaymentRule { percent: dec!(5), window_days: 5 };
        let manual = ManualDiscount { amount: usd(dec!(20)), reason: "Scholarship".into() };
        let fee = assign(&template(dec!(10), Some(early)), &context(true, Some(manual)), d(2026, 2, 1));
        // 500 - 50 - 25 - 20
        assert_eq!(fee.final_amount().unwrap().amount(), dec!(405));
        let sources: Vec<_> = fee.discounts.iter().map(|d| d.source).collect();
        assert_eq!(
            sources,
            vec![DiscountSource::Sibling, DiscountSource::EarlyPayment, DiscountSource::Manual]
        );
        assert!(fee.discount_reason().unwrap().contains("Scholarship"));
    }

    #[test]
    fn test_early_discount_outside_window() {
        let early = EarlyPaymentRule { percent: dec!(5), window_days: 5 };
        // due 2026-02-08, window closes 2026-02-03
        let fee = assign(&template(dec!(0), Some(early)), &context(false, None), d(2026, 2, 4));
        assert!(fee.discounts.is_empty());
        assert_eq!(fee.final_amount().unwrap().amount(), dec!(500));
    }

    #[test]
    fn test_discounts_consuming_whole_fee_are_rejected() {
        let manual = ManualDiscount { amount: usd(dec!(500)), reason: "Full".into() };
        let result = StudentFee::assign(
            StudentId::new(),
            FeeSource::Template(&template(dec!(0), None)),
            &context(false, Some(manual)),
            ActorId::new(),
            d(2026, 2, 1),
            Utc::now(),
        );
        assert!(matches!(result, Err(BillingError::InvalidAmount(_))));
    }

    #[test]
    fn test_allocation_moves_through_partial_to_paid() {
        let mut fee = assign(&template(dec!(10), None), &context(true, None), d(2026, 2, 1));
        fee.allocate(usd(dec!(200)), Utc::now()).unwrap();
        assert_eq!(fee.status, FeeStatus::Partial);
        assert!(fee.has_allocations);

        let err = fee.allocate(usd(dec!(251)), Utc::now()).unwrap_err();
        assert!(matches!(err, BillingError::OverAllocation { .. }));

        fee.allocate(usd(dec!(250)), Utc::now()).unwrap();
        assert_eq!(fee.status, FeeStatus::Paid);
        assert!(fee.amount_outstanding().unwrap().is_zero());
    }

    #[test]
    fn test_reverse_allocation_restores_status() {
        let mut fee = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        fee.allocate(usd(dec!(500)), Utc::now()).unwrap();
        fee.reverse_allocation(usd(dec!(500)), d(2026, 2, 5), Utc::now()).unwrap();
        assert_eq!(fee.status, FeeStatus::Pending);
        assert!(fee.has_allocations);

        fee.allocate(usd(dec!(100)), Utc::now()).unwrap();
        fee.reverse_allocation(usd(dec!(50)), d(2026, 3, 1), Utc::now()).unwrap();
        assert_eq!(fee.status, FeeStatus::Overdue);

        let err = fee.reverse_allocation(usd(dec!(60)), d(2026, 3, 1), Utc::now()).unwrap_err();
        assert!(matches!(err, BillingError::InvariantViolation(_)));
    }

    #[test]
    fn test_late_fee_is_charged_once() {
        let mut fee = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        // due 02-08, grace 3 days -> late from 02-12
        assert!(!fee.accrue_late_fee(d(2026, 2, 11), Utc::now()).unwrap());
        assert!(fee.accrue_late_fee(d(2026, 2, 12), Utc::now()).unwrap());
        assert!(!fee.accrue_late_fee(d(2026, 2, 12), Utc::now()).unwrap());
        assert_eq!(fee.late_fee_applied.amount(), dec!(25));
        assert_eq!(fee.amount_outstanding().unwrap().amount(), dec!(525));
        assert_eq!(fee.status, FeeStatus::Overdue);
    }

    #[test]
    fn test_paid_fee_accrues_nothing() {
        let mut fee = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        fee.allocate(usd(dec!(500)), Utc::now()).unwrap();
        assert!(!fee.accrue_late_fee(d(2026, 6, 1), Utc::now()).unwrap());
        assert_eq!(fee.status, FeeStatus::Paid);
    }

    #[test]
    fn test_waive_rules() {
        let mut fee = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        fee.waive("Hardship", ActorId::new(), Utc::now()).unwrap();
        assert_eq!(fee.status, FeeStatus::Waived);
        assert!(fee.amount_outstanding().unwrap().is_zero());
        assert!(matches!(
            fee.waive("Again", ActorId::new(), Utc::now()),
            Err(BillingError::CannotWaive { .. })
        ));

        let mut paid = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        paid.allocate(usd(dec!(50)), Utc::now()).unwrap();
        assert!(matches!(
            paid.waive("Hardship", ActorId::new(), Utc::now()),
            Err(BillingError::CannotWaive { .. })
        ));
    }

    #[test]
    fn test_cancel_refused_after_allocation() {
        let mut fee = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        fee.allocate(usd(dec!(50)), Utc::now()).unwrap();
        assert!(matches!(fee.cancel(Utc::now()), Err(BillingError::HasPayments(_))));

        let mut untouched = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        untouched.cancel(Utc::now()).unwrap();
        assert_eq!(untouched.status, FeeStatus::Cancelled);
        assert!(untouched.allocate(usd(dec!(1)), Utc::now()).is_err());
    }

    #[test]
    fn test_invoice_discount_share_settles_fee() {
        let mut fee = assign(&template(dec!(10), None), &context(true, None), d(2026, 2, 1));
        fee.apply_invoice_discount(usd(dec!(50)), "Loyalty", Utc::now()).unwrap();
        assert_eq!(fee.final_amount().unwrap().amount(), dec!(400));
        assert_eq!(fee.discounts.last().map(|l| l.source), Some(DiscountSource::Invoice));

        fee.allocate(usd(dec!(400)), Utc::now()).unwrap();
        assert_eq!(fee.status, FeeStatus::Paid);
        assert!(!fee.accrue_late_fee(d(2026, 6, 1), Utc::now()).unwrap());

        let mut other = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        assert!(matches!(
            other.apply_invoice_discount(usd(dec!(501)), "Too much", Utc::now()),
            Err(BillingError::DiscountExceedsOutstanding { .. })
        ));
        other.apply_invoice_discount(usd(dec!(500)), "Full bursary", Utc::now()).unwrap();
        assert_eq!(other.status, FeeStatus::Paid);
    }

    #[test]
    fn test_carried_forward_fee_is_closed() {
        let mut fee = assign(&template(dec!(0), None), &context(false, None), d(2026, 2, 1));
        fee.allocate(usd(dec!(380)), Utc::now()).unwrap();
        let moved = fee.carry_forward(TermId::new(), Utc::now()).unwrap();

        assert_eq!(moved.amount(), dec!(120));
        assert_eq!(fee.status, FeeStatus::CarriedForward);
        assert!(fee.amount_outstanding().unwrap().is_zero());
        assert!(!fee.accrue_late_fee(d(2026, 6, 1), Utc::now()).unwrap());
        assert!(fee.reverse_allocation(usd(dec!(380)), d(2026, 6, 1), Utc::now()).is_err());
        assert!(fee.carry_forward(TermId::new(), Utc::now()).is_err());
    }

    #[test]
    fn test_ad_hoc_fee_takes_manual_discount_only() {
        let ad_hoc = AdHocFee {
            name: "Lost library book".into(),
            kind: FeeKind::Other,
            amount: usd(dec!(30)),
            due_date: d(2026, 3, 1),
            grace_days: 0,
            late_fee_amount: None,
        };
        let manual = ManualDiscount { amount: usd(dec!(5)), reason: "Goodwill".into() };
        let fee = StudentFee::assign(
            StudentId::new(),
            FeeSource::AdHoc(&ad_hoc),
            &context(true, Some(manual)),
            ActorId::new(),
            d(2026, 2, 1),
            Utc::now(),
        )
        .unwrap();
        assert!(fee.template_id.is_none());
        assert_eq!(fee.final_amount().unwrap().amount(), dec!(25));
        assert_eq!(fee.discounts.len(), 1);
    }
}
