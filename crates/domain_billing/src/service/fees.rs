//! Student fee commands

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use core_kernel::{ActorContext, EnrollmentId, FeeTemplateId, StudentFeeId, TermId};

use crate::catalog::{resolve_applicable_template, FeeKind, StudentProfile, TriggerContext};
use crate::command::CommandResult;
use crate::error::BillingError;
use crate::invoice::LineItem;
use crate::store::{committed, ChangeSet};
use crate::student_fee::{AdHocFee, AssignmentContext, FeeSource, ManualDiscount, StudentFee};

use super::LedgerService;

/// Which terms a new fee is created from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeSelection {
    /// A specific catalog template
    Template(FeeTemplateId),
    /// Whichever template applies to the student, optionally of one kind
    Resolve { kind: Option<FeeKind> },
    /// A one-off fee outside the catalog
    AdHoc(AdHocFee),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignFeeRequest {
    pub student: StudentProfile,
    pub selection: FeeSelection,
    pub enrollment_id: Option<EnrollmentId>,
    pub term_id: Option<TermId>,
    /// The academic event date the due date is counted from
    pub trigger_date: NaiveDate,
    pub manual_discount: Option<ManualDiscount>,
}

/// Outcome of a late-fee sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateFeeBatchReport {
    pub as_of: Option<NaiveDate>,
    /// Unsettled fees looked at
    pub examined: usize,
    /// Fees charged a late fee in this run
    pub applied: usize,
    /// Fees still in grace or already charged
    pub skipped: usize,
    /// Fees whose update failed, with the reason
    pub failed: Vec<(StudentFeeId, String)>,
}

impl LedgerService {
    /// Creates a fee from a template, a resolved template or ad-hoc terms
    #[instrument(skip(self, request, actor), fields(student_id = %request.student.student_id))]
    pub async fn assign_fee(
        &self,
        request: AssignFeeRequest,
        actor: &dyn ActorContext,
    ) -> CommandResult<StudentFee> {
        let result = self.try_assign_fee(request, actor).await;
        self.finish("assign_fee", result, |f| {
            format!("Assigned {} to {} for {}", f.name, f.student_id, f.original_amount)
        })
    }

    async fn try_assign_fee(
        &self,
        request: AssignFeeRequest,
        actor: &dyn ActorContext,
    ) -> Result<StudentFee, BillingError> {
        let today = self.today();
        let context = AssignmentContext {
            enrollment_id: request.enrollment_id,
            term_id: request.term_id,
            trigger_date: request.trigger_date,
            has_enrolled_sibling: request.student.has_enrolled_sibling,
            manual_discount: request.manual_discount,
        };
        let created_by = actor.current_actor().id;

        let fee = match &request.selection {
            FeeSelection::Template(id) => {
                let template = self.load_template(*id).await?;
                StudentFee::assign(
                    request.student.student_id,
                    FeeSource::Template(&template),
                    &context,
                    created_by,
                    today,
                    self.now(),
                )?
            }
            FeeSelection::Resolve { kind } => {
                let templates = self.store.list_templates().await?;
                let trigger = TriggerContext {
                    kind: *kind,
                    trigger_date: request.trigger_date,
                    enrollment_id: request.enrollment_id,
                    term_id: request.term_id,
                };
                let template = resolve_applicable_template(&templates, &request.student, &trigger, today)?;
                StudentFee::assign(
                    request.student.student_id,
                    FeeSource::Template(template),
                    &context,
                    created_by,
                    today,
                    self.now(),
                )?
            }
            FeeSelection::AdHoc(terms) => StudentFee::assign(
                request.student.student_id,
                FeeSource::AdHoc(terms),
                &context,
                created_by,
                today,
                self.now(),
            )?,
        };

        let mut changes = ChangeSet::new();
        changes.insert(fee.clone());
        self.commit(changes).await?;
        Ok(committed(fee))
    }

    /// Forgives an untouched fee in full
    ///
    /// A billed fee's balance is credited off its invoice in the same change set.
    #[instrument(skip(self, reason, actor), fields(fee_id = %fee_id))]
    pub async fn waive_fee(
        &self,
        fee_id: StudentFeeId,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> CommandResult<StudentFee> {
        let result = self
            .with_retry("waive_fee", move || self.try_waive_fee(fee_id, reason, actor))
            .await;
        self.finish("waive_fee", result, |f| format!("Waived {} for {}", f.name, f.student_id))
    }

    async fn try_waive_fee(
        &self,
        fee_id: StudentFeeId,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> Result<StudentFee, BillingError> {
        let mut fee = self.load_fee(fee_id).await?;
        let owed = fee.amount_outstanding()?;
        let now = self.now();
        fee.waive(reason, actor.current_actor().id, now)?;

        let mut changes = ChangeSet::new();
        if let Some(mut invoice) = self.billing_invoice(&fee).await? {
            let credit = owed.min(&invoice.amount_outstanding)?;
            if invoice.is_collecting() && credit.is_positive() {
                invoice.add_line(LineItem::adjustment(format!("Waived: {}", fee.name), -credit), now)?;
                changes.update(invoice);
            }
        }
        changes.update(fee.clone());
        self.commit(changes).await?;
        Ok(committed(fee))
    }

    /// Removes a fee that was assigned in error
    ///
    /// Refused once any payment has been allocated to the fee, and while the
    /// fee is billed on a live invoice.
    #[instrument(skip(self, actor), fields(fee_id = %fee_id, actor_id = %actor.current_actor().id))]
    pub async fn delete_fee(&self, fee_id: StudentFeeId, actor: &dyn ActorContext) -> CommandResult<StudentFeeId> {
        let result = self
            .with_retry("delete_fee", move || self.try_delete_fee(fee_id))
            .await;
        self.finish("delete_fee", result, |id| format!("Deleted fee {}", id))
    }

    async fn try_delete_fee(&self, fee_id: StudentFeeId) -> Result<StudentFeeId, BillingError> {
        let fee = self.load_fee(fee_id).await?;
        fee.ensure_deletable()?;
        self.ensure_not_invoiced(&fee).await?;

        let mut changes = ChangeSet::new();
        changes.delete_fee(&fee);
        self.commit(changes).await?;
        Ok(fee.id)
    }

    /// Withdraws a fee but keeps its row; same guards as deletion
    #[instrument(skip(self, actor), fields(fee_id = %fee_id, actor_id = %actor.current_actor().id))]
    pub async fn cancel_fee(&self, fee_id: StudentFeeId, actor: &dyn ActorContext) -> CommandResult<StudentFee> {
        let result = self
            .with_retry("cancel_fee", move || self.try_cancel_fee(fee_id))
            .await;
        self.finish("cancel_fee", result, |f| format!("Cancelled {} for {}", f.name, f.student_id))
    }

    async fn try_cancel_fee(&self, fee_id: StudentFeeId) -> Result<StudentFee, BillingError> {
        let mut fee = self.load_fee(fee_id).await?;
        fee.ensure_deletable()?;
        self.ensure_not_invoiced(&fee).await?;
        fee.cancel(self.now())?;

        let mut changes = ChangeSet::new();
        changes.update(fee.clone());
        self.commit(changes).await?;
        Ok(committed(fee))
    }

    async fn ensure_not_invoiced(&self, fee: &StudentFee) -> Result<(), BillingError> {
        if let Some(invoice) = self.billing_invoice(fee).await? {
            return Err(BillingError::FeeAlreadyInvoiced {
                fee: fee.id.to_string(),
                invoice: invoice.invoice_number.clone(),
            });
        }
        Ok(())
    }

    /// Charges one fee's late fee if it is due; `false` when nothing changed
    ///
    /// A billed fee is charged only while its invoice still collects, and
    /// the charge is added to that invoice as a late fee line.
    #[instrument(skip(self), fields(fee_id = %fee_id, as_of = %as_of))]
    pub async fn accrue_late_fee(&self, fee_id: StudentFeeId, as_of: NaiveDate) -> CommandResult<bool> {
        let result = self
            .with_retry("accrue_late_fee", move || self.try_accrue_late_fee(fee_id, as_of))
            .await;
        self.finish("accrue_late_fee", result, |applied| {
            if *applied {
                format!("Late fee charged on {}", fee_id)
            } else {
                format!("No late fee due on {}", fee_id)
            }
        })
    }

    async fn try_accrue_late_fee(&self, fee_id: StudentFeeId, as_of: NaiveDate) -> Result<bool, BillingError> {
        let mut fee = self.load_fee(fee_id).await?;
        let invoice = self.billing_invoice(&fee).await?;
        if invoice.as_ref().is_some_and(|i| !i.is_collecting()) {
            return Ok(false);
        }

        let now = self.now();
        let charged_before = fee.late_fee_applied;
        if !fee.accrue_late_fee(as_of, now)? {
            return Ok(false);
        }
        let charged = fee.late_fee_applied.checked_sub(&charged_before)?;

        let mut changes = ChangeSet::new();
        if let Some(mut invoice) = invoice {
            if charged.is_positive() {
                invoice.add_line(LineItem::late_fee(fee.id, &fee.name, charged), now)?;
                changes.update(invoice);
            }
        }
        changes.update(fee);
        self.commit(changes).await?;
        Ok(true)
    }

    /// Sweeps every unsettled fee, one change set per fee
    ///
    /// A failure on one fee is recorded in the report and the sweep moves
    /// on. Re-running for the same date charges nothing twice.
    #[instrument(skip(self), fields(as_of = %as_of))]
    pub async fn accrue_late_fees(&self, as_of: NaiveDate) -> CommandResult<LateFeeBatchReport> {
        let result = self.try_accrue_late_fees(as_of).await;
        self.finish("accrue_late_fees", result, |r| {
            format!(
                "Examined {} fees: {} charged, {} skipped, {} failed",
                r.examined,
                r.applied,
                r.skipped,
                r.failed.len()
            )
        })
    }

    async fn try_accrue_late_fees(&self, as_of: NaiveDate) -> Result<LateFeeBatchReport, BillingError> {
        let fees = self.store.list_unsettled_fees().await?;
        let mut report = LateFeeBatchReport {
            as_of: Some(as_of),
            ..LateFeeBatchReport::default()
        };

        for fee in fees {
            report.examined += 1;
            let fee_id = fee.id;
            let outcome = self
                .with_retry("accrue_late_fee", move || self.try_accrue_late_fee(fee_id, as_of))
                .await;
            match outcome {
                Ok(true) => {
                    info!(fee_id = %fee_id, student_id = %fee.student_id, "Late fee charged");
                    report.applied += 1;
                }
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    warn!(fee_id = %fee_id, error = %err, "Late fee accrual failed");
                    report.failed.push((fee_id, err.to_string()));
                }
            }
        }
        Ok(report)
    }
}
