//! Invoice commands

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use core_kernel::ports::format_reference;
use core_kernel::temporal::fiscal_year;
use core_kernel::{ActorContext, InvoiceId, StudentFeeId, StudentId, TermId};

use crate::command::CommandResult;
use crate::error::BillingError;
use crate::invoice::{DiscountSpec, Invoice, LineItem, LineItemKind};
use crate::payment::distribute_to_fees;
use crate::store::{committed, ChangeSet};
use crate::student_fee::StudentFee;

use super::LedgerService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInvoiceRequest {
    pub student_id: StudentId,
    pub term_id: Option<TermId>,
    /// Fees to bill, one line each, in this order
    pub fee_ids: Vec<StudentFeeId>,
}

impl LedgerService {
    /// Bills a student's fees on a new invoice
    ///
    /// Each line snapshots what the fee owes at invoicing time. The billed
    /// fees are re-staged unchanged so that two invoices racing for the same
    /// fee conflict, and the loser sees `FeeAlreadyInvoiced` on retry.
    #[instrument(skip(self, request, actor), fields(student_id = %request.student_id, fees = request.fee_ids.len()))]
    pub async fn create_invoice(
        &self,
        request: CreateInvoiceRequest,
        actor: &dyn ActorContext,
    ) -> CommandResult<Invoice> {
        let result = match self.next_invoice_number(&request).await {
            Ok(number) => {
                let (request, number) = (&request, number.as_str());
                self.with_retry("create_invoice", move || self.try_create_invoice(request, number, actor))
                    .await
            }
            Err(err) => Err(err),
        };
        self.finish("create_invoice", result, |i| {
            format!("Issued {} for {}", i.invoice_number, i.amount_total)
        })
    }

    async fn next_invoice_number(&self, request: &CreateInvoiceRequest) -> Result<String, BillingError> {
        if request.fee_ids.is_empty() {
            return Err(BillingError::invalid("an invoice needs at least one fee"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = request.fee_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(BillingError::invalid(format!("fee {} is listed twice", dup)));
        }
        self.issue_invoice_number().await
    }

    pub(super) async fn issue_invoice_number(&self) -> Result<String, BillingError> {
        let year = fiscal_year(self.today(), self.config.fiscal_year_start_month);
        let value = self.sequences.next_value(&self.config.invoice_prefix, year).await?;
        Ok(format_reference(&self.config.invoice_prefix, year, value))
    }

    async fn try_create_invoice(
        &self,
        request: &CreateInvoiceRequest,
        invoice_number: &str,
        actor: &dyn ActorContext,
    ) -> Result<Invoice, BillingError> {
        let mut fees: Vec<StudentFee> = Vec::with_capacity(request.fee_ids.len());
        for id in &request.fee_ids {
            let fee = self.load_fee(*id).await?;
            if fee.student_id != request.student_id {
                return Err(BillingError::StudentMismatch {
                    entity: "StudentFee",
                    id: fee.id.to_string(),
                    student: request.student_id.to_string(),
                });
            }
            if fee.status.is_terminal() {
                return Err(BillingError::AlreadyFinal {
                    entity: "StudentFee",
                    id: fee.id.to_string(),
                    status: fee.status.as_str().into(),
                });
            }
            fees.push(fee);
        }

        let existing = self.store.list_invoices_for_student(request.student_id).await?;
        for fee in &fees {
            if let Some(invoice) = existing.iter().find(|i| i.is_live() && i.bills_fee(fee.id)) {
                return Err(BillingError::FeeAlreadyInvoiced {
                    fee: fee.id.to_string(),
                    invoice: invoice.invoice_number.clone(),
                });
            }
        }

        let currency = fees
            .first()
            .map(StudentFee::currency)
            .ok_or_else(|| BillingError::invalid("an invoice needs at least one fee"))?;
        let mut lines = Vec::with_capacity(fees.len());
        for fee in &fees {
            if fee.currency() != currency {
                return Err(BillingError::CurrencyMismatch {
                    expected: currency.to_string(),
                    actual: fee.currency().to_string(),
                });
            }
            let owed = fee.amount_outstanding()?;
            if !owed.is_positive() {
                return Err(BillingError::InvalidAmount(format!(
                    "fee {} has nothing outstanding",
                    fee.id
                )));
            }
            lines.push(LineItem::fee(fee.id, fee.name.clone(), owed));
        }

        let invoice = Invoice::new(
            invoice_number.to_string(),
            request.student_id,
            request.term_id,
            currency,
            lines,
            actor.current_actor().id,
            self.today(),
            self.now(),
        )?;

        let mut changes = ChangeSet::new();
        changes.insert(invoice.clone());
        for fee in fees {
            changes.update(fee);
        }
        self.commit(changes).await?;
        Ok(committed(invoice))
    }

    /// Discounts the unpaid part of an invoice; returns the updated invoice
    ///
    /// The discount is shared out over the billed fees in line order, each up
    /// to what it still owes, so a fully discounted invoice leaves no fee
    /// open. Whatever exceeds the fees' balances stays on the invoice.
    #[instrument(skip(self, reason, actor), fields(invoice_id = %invoice_id))]
    pub async fn apply_discount(
        &self,
        invoice_id: InvoiceId,
        spec: DiscountSpec,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> CommandResult<Invoice> {
        let result = self
            .with_retry("apply_discount", move || self.try_apply_discount(invoice_id, spec, reason, actor))
            .await;
        self.finish("apply_discount", result, |i| {
            format!("{} now owes {}", i.invoice_number, i.amount_outstanding)
        })
    }

    async fn try_apply_discount(
        &self,
        invoice_id: InvoiceId,
        spec: DiscountSpec,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> Result<Invoice, BillingError> {
        let mut invoice = self.load_invoice(invoice_id).await?;
        let now = self.now();
        let discount = invoice.apply_discount(spec, reason, actor.current_actor().id, now)?;

        let mut fees = Vec::new();
        for fee_id in invoice.fee_ids() {
            if let Some(fee) = self.store.get_fee(fee_id).await? {
                fees.push(fee);
            }
        }
        let refs: Vec<&StudentFee> = fees.iter().collect();
        let shares = distribute_to_fees(discount, &refs)?;

        let mut changes = ChangeSet::new();
        for share in &shares {
            if let Some(fee) = fees.iter_mut().find(|f| f.id == share.student_fee_id) {
                fee.apply_invoice_discount(share.amount, reason, now)?;
                changes.update(fee.clone());
            }
        }
        changes.update(invoice.clone());
        self.commit(changes).await?;
        Ok(committed(invoice))
    }

    /// Adds a supply or adjustment line to an open invoice
    ///
    /// Fee lines are only created with the invoice and carryover lines only
    /// by promotion.
    #[instrument(skip(self, item, actor), fields(invoice_id = %invoice_id, actor_id = %actor.current_actor().id))]
    pub async fn add_line_item(
        &self,
        invoice_id: InvoiceId,
        item: LineItem,
        actor: &dyn ActorContext,
    ) -> CommandResult<Invoice> {
        let result = match item.kind {
            LineItemKind::Supply | LineItemKind::Adjustment => {
                let item = &item;
                self.with_retry("add_line_item", move || self.try_add_line_item(invoice_id, item))
                    .await
            }
            LineItemKind::Fee { .. }
            | LineItemKind::Carryover { .. }
            | LineItemKind::LateFee { .. }
            | LineItemKind::CarriedForward { .. } => Err(BillingError::invalid(
                "only supply and adjustment lines can be added to an existing invoice",
            )),
        };
        self.finish("add_line_item", result, |i| {
            format!("{} total is now {}", i.invoice_number, i.amount_total)
        })
    }

    async fn try_add_line_item(&self, invoice_id: InvoiceId, item: &LineItem) -> Result<Invoice, BillingError> {
        let mut invoice = self.load_invoice(invoice_id).await?;
        invoice.add_line(item.clone(), self.now())?;
        let mut changes = ChangeSet::new();
        changes.update(invoice.clone());
        self.commit(changes).await?;
        Ok(committed(invoice))
    }

    /// Cancels an invoice nothing has been allocated to
    #[instrument(skip(self, reason, actor), fields(invoice_id = %invoice_id))]
    pub async fn cancel_invoice(
        &self,
        invoice_id: InvoiceId,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> CommandResult<Invoice> {
        let result = self
            .with_retry("cancel_invoice", move || self.try_cancel_invoice(invoice_id, reason, actor))
            .await;
        self.finish("cancel_invoice", result, |i| format!("Cancelled {}", i.invoice_number))
    }

    async fn try_cancel_invoice(
        &self,
        invoice_id: InvoiceId,
        reason: &str,
        actor: &dyn ActorContext,
    ) -> Result<Invoice, BillingError> {
        let mut invoice = self.load_invoice(invoice_id).await?;
        invoice.cancel(reason, actor.current_actor().id, self.now())?;
        let mut changes = ChangeSet::new();
        changes.update(invoice.clone());
        self.commit(changes).await?;
        Ok(committed(invoice))
    }
}
