//! Promotion commands

use tracing::{debug, info, instrument, warn};

use core_kernel::{ActorContext, Money, StudentId, TermId};

use crate::command::CommandResult;
use crate::error::BillingError;
use crate::invoice::{Invoice, LineItem};
use crate::promotion::{BulkPromotionReport, PromotionCarryover, PromotionResult};
use crate::store::{committed, ChangeSet};

use super::LedgerService;

impl LedgerService {
    /// Carries a student's unpaid source-term balance into the destination term
    ///
    /// The balance moves to one carryover invoice in the destination term.
    /// In the same change set each source invoice with a balance gets a
    /// negative "Carried forward" line and its unpaid fees are closed as
    /// carried forward, so the student's total outstanding is unchanged. A
    /// student is promoted into a term once, and a source term is carried
    /// forward once, even when nothing was owed.
    #[instrument(skip(self, actor), fields(student_id = %student_id, source = %source_term, destination = %destination_term))]
    pub async fn promote_student(
        &self,
        student_id: StudentId,
        source_term: TermId,
        destination_term: TermId,
        actor: &dyn ActorContext,
    ) -> CommandResult<PromotionResult> {
        let result = self.promote(student_id, source_term, destination_term, actor).await;
        self.finish("promote_student", result, |r| {
            format!("Promoted {} carrying {}", r.carryover.student_id, r.carried_amount())
        })
    }

    async fn promote(
        &self,
        student_id: StudentId,
        source_term: TermId,
        destination_term: TermId,
        actor: &dyn ActorContext,
    ) -> Result<PromotionResult, BillingError> {
        if source_term == destination_term {
            return Err(BillingError::invalid("source and destination terms must differ"));
        }
        self.with_retry("promote_student", move || {
            self.try_promote(student_id, source_term, destination_term, actor)
        })
        .await
    }

    async fn try_promote(
        &self,
        student_id: StudentId,
        source_term: TermId,
        destination_term: TermId,
        actor: &dyn ActorContext,
    ) -> Result<PromotionResult, BillingError> {
        if self.store.find_carryover(student_id, destination_term).await?.is_some() {
            return Err(BillingError::AlreadyPromoted {
                student: student_id.to_string(),
                term: destination_term.to_string(),
            });
        }
        let earlier = self.store.list_carryovers_for_student(student_id).await?;
        if let Some(previous) = earlier.iter().find(|c| c.source_term == source_term) {
            return Err(BillingError::AlreadyCarriedForward {
                student: student_id.to_string(),
                term: source_term.to_string(),
                destination: previous.destination_term.to_string(),
            });
        }

        let mut invoices: Vec<Invoice> = self
            .store
            .list_invoices_for_student(student_id)
            .await?
            .into_iter()
            .filter(|i| i.is_live() && i.term_id == Some(source_term))
            .collect();

        let currency = match invoices.first() {
            Some(first) => first.currency,
            None => self.config.default_currency,
        };
        if let Some(other) = invoices.iter().find(|i| i.currency != currency) {
            return Err(BillingError::CurrencyMismatch {
                expected: currency.to_string(),
                actual: other.currency.to_string(),
            });
        }
        let carried = Money::sum(invoices.iter().map(|i| &i.amount_outstanding), currency)?;

        let created_by = actor.current_actor().id;
        let now = self.now();
        let mut changes = ChangeSet::new();

        // close the source side so the balance is owed in one term only
        for invoice in invoices.iter_mut().filter(|i| i.amount_outstanding.is_positive()) {
            for fee_id in invoice.fee_ids() {
                if let Some(mut fee) = self.store.get_fee(fee_id).await? {
                    if !fee.status.is_terminal() && fee.amount_outstanding()?.is_positive() {
                        let moved = fee.carry_forward(destination_term, now)?;
                        debug!(fee_id = %fee.id, moved = %moved, "Fee carried forward");
                        changes.update(fee);
                    }
                }
            }
            let balance = invoice.amount_outstanding;
            invoice.add_line(LineItem::carried_forward(destination_term, balance), now)?;
            changes.update(invoice.clone());
        }

        let invoice = if carried.is_positive() {
            let number = self.issue_invoice_number().await?;
            Some(Invoice::new(
                number,
                student_id,
                Some(destination_term),
                currency,
                vec![LineItem::carryover(source_term, carried)],
                created_by,
                self.today(),
                now,
            )?)
        } else {
            None
        };

        let carryover = PromotionCarryover::new(
            student_id,
            source_term,
            destination_term,
            carried,
            invoice.as_ref().map(|i| i.id),
            created_by,
            now,
        )?;

        changes.insert(carryover.clone());
        if let Some(invoice) = &invoice {
            changes.insert(invoice.clone());
        }
        self.commit(changes).await?;

        Ok(PromotionResult {
            carryover: committed(carryover),
            invoice: invoice.map(committed),
        })
    }

    /// Promotes each student in its own change set and reports the outcome
    #[instrument(skip(self, student_ids, actor), fields(students = student_ids.len(), source = %source_term, destination = %destination_term))]
    pub async fn bulk_promote(
        &self,
        student_ids: &[StudentId],
        source_term: TermId,
        destination_term: TermId,
        actor: &dyn ActorContext,
    ) -> CommandResult<BulkPromotionReport> {
        let mut report = BulkPromotionReport::default();
        for &student_id in student_ids {
            match self.promote(student_id, source_term, destination_term, actor).await {
                Ok(result) => {
                    info!(student_id = %student_id, carried = %result.carried_amount(), "Student promoted");
                    report.record_success();
                }
                Err(err) => {
                    warn!(student_id = %student_id, error = %err, "Promotion failed");
                    report.record_failure(student_id, err.to_string());
                }
            }
        }
        self.finish("bulk_promote", Ok(report), |r| {
            format!("Promoted {} of {} students", r.successful, r.total)
        })
    }
}
