//! Billing Domain - Tuition Fee Ledger
//!
//! This crate tracks what students owe and what they have paid:
//!
//! - **Catalog**: fee categories and versioned fee templates
//! - **Student fees**: per-student obligations with discounts, late fees,
//!   waivers and allocations
//! - **Invoices**: bills snapshotting fee balances, plus supply and
//!   adjustment lines and discounts
//! - **Payments**: record → confirm (locked) → void, with append-only
//!   adjustments and a full audit trail
//! - **Promotion**: carrying unpaid balances into the next term
//!
//! # Consistency
//!
//! All state lives behind the [`LedgerStore`] port. Each command commits one
//! [`ChangeSet`]; rows carry a version and stale writes are rejected, so
//! concurrent commands against the same invoice or fee serialize through
//! reload-and-retry in [`LedgerService`].
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{LedgerService, InMemoryLedgerStore, LedgerConfig};
//!
//! let service = LedgerService::new(store, clock, sequences, LedgerConfig::default());
//! let invoice = service.create_invoice(request, &actor).await;
//! if invoice.succeeded {
//!     let payment = service.record_payment(new_payment, &actor).await;
//! }
//! ```

pub mod adapters;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod invoice;
pub mod payment;
pub mod promotion;
pub mod service;
pub mod store;
pub mod student_fee;

pub use adapters::InMemoryLedgerStore;
pub use catalog::{
    ApplicabilityScope, EarlyPaymentRule, EnrollmentStatus, FeeCategory, FeeKind, FeeTemplate,
    LateFeeRule, NewFeeCategory, NewFeeTemplate, RuleChange, StudentProfile, TemplateAmendment,
    TemplateStatus, TriggerContext,
};
pub use command::CommandResult;
pub use config::LedgerConfig;
pub use error::{BillingError, ErrorKind};
pub use invoice::{DiscountSpec, Invoice, InvoiceStatus, LineItem, LineItemKind};
pub use payment::{
    AuditEvent, FeeAllocation, NewPayment, Payment, PaymentAdjustment, PaymentAudit,
    PaymentMethod, PaymentStatus,
};
pub use promotion::{BulkPromotionReport, PromotionCarryover, PromotionResult};
pub use service::{
    AssignFeeRequest, CreateInvoiceRequest, FeeSelection, LateFeeBatchReport, LedgerService,
    ADJUST_PAYMENTS,
};
pub use store::{ChangeSet, LedgerStore, RecordKind, StoreError};
pub use student_fee::{AdHocFee, CarryForwardRecord, FeeStatus, ManualDiscount, StudentFee};
