//! Read-side queries

use chrono::NaiveDate;
use tracing::instrument;

use core_kernel::{InvoiceId, PaymentId, StudentFeeId, StudentId};

use crate::catalog::FeeTemplate;
use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::payment::{Payment, PaymentAudit};
use crate::student_fee::StudentFee;

use super::LedgerService;

impl LedgerService {
    pub async fn get_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, BillingError> {
        self.load_invoice(invoice_id).await
    }

    pub async fn get_invoice_by_number(&self, invoice_number: &str) -> Result<Invoice, BillingError> {
        self.store
            .find_invoice_by_number(invoice_number)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", invoice_number))
    }

    /// Open and partially paid invoices, optionally for one student
    pub async fn list_outstanding_invoices(
        &self,
        student_id: Option<StudentId>,
    ) -> Result<Vec<Invoice>, BillingError> {
        Ok(self.store.list_outstanding_invoices(student_id).await?)
    }

    pub async fn get_fee(&self, fee_id: StudentFeeId) -> Result<StudentFee, BillingError> {
        self.load_fee(fee_id).await
    }

    pub async fn list_fees(&self, student_id: StudentId) -> Result<Vec<StudentFee>, BillingError> {
        Ok(self.store.list_fees_for_student(student_id).await?)
    }

    /// Unsettled fees past their grace period on `as_of` that still owe money
    #[instrument(skip(self), fields(as_of = %as_of))]
    pub async fn list_overdue_fees(&self, as_of: NaiveDate) -> Result<Vec<StudentFee>, BillingError> {
        let mut overdue = Vec::new();
        for fee in self.store.list_unsettled_fees().await? {
            if fee.is_past_grace(as_of)? && fee.amount_outstanding()?.is_positive() {
                overdue.push(fee);
            }
        }
        Ok(overdue)
    }

    pub async fn list_templates(&self) -> Result<Vec<FeeTemplate>, BillingError> {
        Ok(self.store.list_templates().await?)
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<Payment, BillingError> {
        self.load_payment(payment_id).await
    }

    /// A student's payments by payment date, then recording time
    pub async fn payment_history(&self, student_id: StudentId) -> Result<Vec<Payment>, BillingError> {
        let mut payments = self.store.list_payments_for_student(student_id).await?;
        payments.sort_by_key(|p| (p.payment_date(), p.recorded_at()));
        Ok(payments)
    }

    /// The payment as recorded, every adjustment in order, and its net effect
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn payment_audit(&self, payment_id: PaymentId) -> Result<PaymentAudit, BillingError> {
        let payment = self.load_payment(payment_id).await?;
        let adjustments = self.store.list_adjustments(payment_id).await?;
        PaymentAudit::build(payment, adjustments)
    }
}
