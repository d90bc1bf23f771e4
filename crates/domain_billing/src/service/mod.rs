//! Ledger service
//!
//! [`LedgerService`] is the command and query surface of the ledger. Each
//! command loads the rows it needs, applies the domain rules to in-memory
//! copies, and commits every touched row in one [`ChangeSet`]. A commit that
//! loses a version race is retried from a fresh read; the business checks
//! (over-allocation, already promoted, ...) therefore always run against the
//! state the commit will be validated against.
//!
//! Commands return [`CommandResult`]; queries return `Result`.

mod catalog;
mod fees;
mod invoices;
mod payments;
mod promotion;
mod queries;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, warn};

use core_kernel::{Clock, FeeTemplateId, InvoiceId, PaymentId, SequenceGenerator, StudentFeeId};

use crate::command::CommandResult;
use crate::config::LedgerConfig;
use crate::error::{BillingError, ErrorKind};
use crate::catalog::FeeTemplate;
use crate::invoice::Invoice;
use crate::payment::Payment;
use crate::store::{ChangeSet, LedgerStore};
use crate::student_fee::StudentFee;

pub use fees::{AssignFeeRequest, FeeSelection, LateFeeBatchReport};
pub use invoices::CreateInvoiceRequest;

/// Permission required to adjust a confirmed payment
pub const ADJUST_PAYMENTS: &str = "ledger.payments.adjust";

/// Orchestrates ledger commands over the injected ports
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    sequences: Arc<dyn SequenceGenerator>,
    config: LedgerConfig,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        sequences: Arc<dyn SequenceGenerator>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            sequences,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    async fn load_template(&self, id: FeeTemplateId) -> Result<FeeTemplate, BillingError> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| BillingError::not_found("FeeTemplate", id))
    }

    async fn load_fee(&self, id: StudentFeeId) -> Result<StudentFee, BillingError> {
        self.store
            .get_fee(id)
            .await?
            .ok_or_else(|| BillingError::not_found("StudentFee", id))
    }

    async fn load_invoice(&self, id: InvoiceId) -> Result<Invoice, BillingError> {
        self.store
            .get_invoice(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Invoice", id))
    }

    async fn load_payment(&self, id: PaymentId) -> Result<Payment, BillingError> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Payment", id))
    }

    /// The live invoice that bills `fee`, if any
    async fn billing_invoice(&self, fee: &StudentFee) -> Result<Option<Invoice>, BillingError> {
        let invoices = self.store.list_invoices_for_student(fee.student_id).await?;
        Ok(invoices.into_iter().find(|i| i.is_live() && i.bills_fee(fee.id)))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), BillingError> {
        Ok(self.store.commit(changes).await?)
    }

    /// Runs `attempt` until it stops losing version races
    ///
    /// Only `ConcurrencyConflict` is retried. Each attempt must reload what
    /// it reads, so the closure is called afresh every time.
    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, BillingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BillingError>>,
    {
        let mut retries: u32 = 0;
        loop {
            match attempt().await {
                Err(BillingError::ConcurrencyConflict(detail))
                    if retries < self.config.max_conflict_retries =>
                {
                    retries += 1;
                    warn!(operation, retries, %detail, "Version conflict, reloading");
                    let backoff = self.config.retry_backoff_ms.saturating_mul(u64::from(retries));
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                other => return other,
            }
        }
    }

    /// Translates an internal result to the command boundary and logs it
    fn finish<T>(
        &self,
        operation: &'static str,
        result: Result<T, BillingError>,
        describe: impl FnOnce(&T) -> String,
    ) -> CommandResult<T> {
        match result {
            Ok(data) => {
                let message = describe(&data);
                info!(operation, %message, "Command succeeded");
                CommandResult::success(data, message)
            }
            Err(err) => {
                let kind = err.kind();
                match kind {
                    ErrorKind::Infrastructure | ErrorKind::InvariantViolation => {
                        error!(operation, ?kind, error = %err, "Command failed")
                    }
                    _ => warn!(operation, ?kind, error = %err, "Command rejected"),
                }
                CommandResult::failure(err)
            }
        }
    }
}
