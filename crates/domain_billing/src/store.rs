//! Ledger store port
//!
//! All durable state lives behind [`LedgerStore`]. Reads return plain
//! entities carrying the `version` they were read at; writes are staged in a
//! [`ChangeSet`] and committed atomically. A commit fails with
//! [`StoreError::Conflict`] if any staged row changed since it was read,
//! which is how concurrent confirmations against the same invoice are
//! serialized without holding locks across await points.
//!
//! # Versions
//!
//! - an inserted row must carry version 0 and is stored as version 1
//! - an updated row carries the version it was read at and is stored as
//!   that version + 1

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use core_kernel::{
    DomainPort, FeeCategoryId, FeeTemplateId, InvoiceId, PaymentId, StudentFeeId, StudentId, TermId,
};

use crate::catalog::{FeeCategory, FeeTemplate, TemplateStatus};
use crate::invoice::Invoice;
use crate::payment::{Payment, PaymentAdjustment};
use crate::promotion::PromotionCarryover;
use crate::student_fee::StudentFee;

/// The kinds of row the ledger persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    FeeCategory,
    FeeTemplate,
    StudentFee,
    Invoice,
    Payment,
    PaymentAdjustment,
    PromotionCarryover,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::FeeCategory => "fee_category",
            RecordKind::FeeTemplate => "fee_template",
            RecordKind::StudentFee => "student_fee",
            RecordKind::Invoice => "invoice",
            RecordKind::Payment => "payment",
            RecordKind::PaymentAdjustment => "payment_adjustment",
            RecordKind::PromotionCarryover => "promotion_carryover",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by store adapters
#[derive(Debug, Error)]
pub enum StoreError {
    /// A staged row's version no longer matches the stored one
    #[error("Version conflict on {kind} {id}: expected {expected}, found {found:?}")]
    Conflict {
        kind: RecordKind,
        id: Uuid,
        expected: u64,
        found: Option<u64>,
    },

    /// A unique natural key (invoice number, payment reference, ...) is taken
    #[error("Duplicate {kind} key {key}")]
    Duplicate {
        kind: RecordKind,
        key: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// An entity the store can persist
///
/// Besides identity and version, each record exposes the columns adapters
/// index on: owning student, parent row, unique natural key and status.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: RecordKind;

    fn record_id(&self) -> Uuid;

    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);

    fn student_id(&self) -> Option<StudentId> {
        None
    }

    fn parent_id(&self) -> Option<Uuid> {
        None
    }

    fn natural_key(&self) -> Option<String> {
        None
    }

    fn status_label(&self) -> Option<String> {
        None
    }
}

/// A staged write
#[derive(Debug, Clone)]
pub enum Write<R> {
    Insert(R),
    Update(R),
}

impl<R: Record> Write<R> {
    pub fn record(&self) -> &R {
        match self {
            Write::Insert(r) | Write::Update(r) => r,
        }
    }

    pub fn into_record(self) -> R {
        match self {
            Write::Insert(r) | Write::Update(r) => r,
        }
    }

    /// Version the stored row must have for the write to apply; `None` means
    /// the row must not exist
    pub fn expected_version(&self) -> Option<u64> {
        match self {
            Write::Insert(_) => None,
            Write::Update(r) => Some(r.version()),
        }
    }
}

/// Routes a record type to its slot in a change set
pub trait Staged: Record {
    fn slot(changes: &mut ChangeSet) -> &mut Vec<Write<Self>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeDeletion {
    pub id: StudentFeeId,
    pub expected_version: u64,
}

/// The atomic unit of write against the store
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub categories: Vec<Write<FeeCategory>>,
    pub templates: Vec<Write<FeeTemplate>>,
    pub fees: Vec<Write<StudentFee>>,
    pub fee_deletions: Vec<FeeDeletion>,
    pub invoices: Vec<Write<Invoice>>,
    pub payments: Vec<Write<Payment>>,
    pub adjustments: Vec<Write<PaymentAdjustment>>,
    pub carryovers: Vec<Write<PromotionCarryover>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<R: Staged>(&mut self, record: R) -> &mut Self {
        R::slot(self).push(Write::Insert(record));
        self
    }

    pub fn update<R: Staged>(&mut self, record: R) -> &mut Self {
        R::slot(self).push(Write::Update(record));
        self
    }

    pub fn delete_fee(&mut self, fee: &StudentFee) -> &mut Self {
        self.fee_deletions.push(FeeDeletion {
            id: fee.id,
            expected_version: fee.version,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.categories.len()
            + self.templates.len()
            + self.fees.len()
            + self.fee_deletions.len()
            + self.invoices.len()
            + self.payments.len()
            + self.adjustments.len()
            + self.carryovers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns a record as it reads back after a successful commit
pub fn committed<R: Record>(mut record: R) -> R {
    let next = record.version() + 1;
    record.set_version(next);
    record
}

macro_rules! impl_record {
    ($ty:ty, $kind:ident, $slot:ident, |$r:ident| {
        id: $id:expr,
        student: $student:expr,
        parent: $parent:expr,
        key: $key:expr,
        status: $status:expr $(,)?
    }) => {
        #[allow(unused_variables)]
        impl Record for $ty {
            const KIND: RecordKind = RecordKind::$kind;

            fn record_id(&self) -> Uuid {
                let $r = self;
                $id
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn set_version(&mut self, version: u64) {
                self.version = version;
            }

            fn student_id(&self) -> Option<StudentId> {
                let $r = self;
                $student
            }

            fn parent_id(&self) -> Option<Uuid> {
                let $r = self;
                $parent
            }

            fn natural_key(&self) -> Option<String> {
                let $r = self;
                $key
            }

            fn status_label(&self) -> Option<String> {
                let $r = self;
                $status
            }
        }

        impl Staged for $ty {
            fn slot(changes: &mut ChangeSet) -> &mut Vec<Write<Self>> {
                &mut changes.$slot
            }
        }
    };
}

impl_record!(FeeCategory, FeeCategory, categories, |r| {
    id: *r.id.as_uuid(),
    student: None,
    parent: None,
    key: None,
    status: Some(if r.is_active { "Active" } else { "Inactive" }.to_string()),
});

impl_record!(FeeTemplate, FeeTemplate, templates, |r| {
    id: *r.id.as_uuid(),
    student: None,
    parent: Some(*r.category_id.as_uuid()),
    key: None,
    status: Some(match r.status {
        TemplateStatus::Active => "Active".to_string(),
        TemplateStatus::Inactive => "Inactive".to_string(),
    }),
});

impl_record!(StudentFee, StudentFee, fees, |r| {
    id: *r.id.as_uuid(),
    student: Some(r.student_id),
    parent: r.template_id.map(|t| *t.as_uuid()),
    key: None,
    status: Some(r.status.as_str().to_string()),
});

impl_record!(Invoice, Invoice, invoices, |r| {
    id: *r.id.as_uuid(),
    student: Some(r.student_id),
    parent: r.term_id.map(|t| *t.as_uuid()),
    key: Some(r.invoice_number.clone()),
    status: Some(r.status.as_str().to_string()),
});

impl_record!(Payment, Payment, payments, |r| {
    id: *r.id().as_uuid(),
    student: Some(r.student_id()),
    parent: r.invoice_id().map(|i| *i.as_uuid()),
    key: Some(r.reference().to_string()),
    status: Some(r.status().as_str().to_string()),
});

impl_record!(PaymentAdjustment, PaymentAdjustment, adjustments, |r| {
    id: *r.id.as_uuid(),
    student: None,
    parent: Some(*r.payment_id.as_uuid()),
    key: Some(format!("{}:{}", r.payment_id, r.sequence)),
    status: None,
});

impl_record!(PromotionCarryover, PromotionCarryover, carryovers, |r| {
    id: *r.id.as_uuid(),
    student: Some(r.student_id),
    parent: r.invoice_id.map(|i| *i.as_uuid()),
    key: Some(PromotionCarryover::promotion_key(r.student_id, r.destination_term)),
    status: None,
});

/// Durable storage for the billing ledger
///
/// Query methods return rows in a stable order (creation order unless
/// stated otherwise). `commit` applies a whole change set or nothing.
#[async_trait]
pub trait LedgerStore: DomainPort {
    async fn get_category(&self, id: FeeCategoryId) -> Result<Option<FeeCategory>, StoreError>;

    async fn get_template(&self, id: FeeTemplateId) -> Result<Option<FeeTemplate>, StoreError>;

    async fn list_templates(&self) -> Result<Vec<FeeTemplate>, StoreError>;

    async fn get_fee(&self, id: StudentFeeId) -> Result<Option<StudentFee>, StoreError>;

    async fn list_fees_for_student(&self, student_id: StudentId) -> Result<Vec<StudentFee>, StoreError>;

    /// Fees that are neither settled nor terminal (Pending, Partial, Overdue)
    async fn list_unsettled_fees(&self) -> Result<Vec<StudentFee>, StoreError>;

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;

    async fn find_invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, StoreError>;

    async fn list_invoices_for_student(&self, student_id: StudentId) -> Result<Vec<Invoice>, StoreError>;

    /// Open and partially paid invoices
    async fn list_outstanding_invoices(
        &self,
        student_id: Option<StudentId>,
    ) -> Result<Vec<Invoice>, StoreError>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    /// Ordered by payment date, then recording time
    async fn list_payments_for_student(&self, student_id: StudentId) -> Result<Vec<Payment>, StoreError>;

    /// Ordered by chain sequence
    async fn list_adjustments(&self, payment_id: PaymentId) -> Result<Vec<PaymentAdjustment>, StoreError>;

    async fn find_carryover(
        &self,
        student_id: StudentId,
        destination_term: TermId,
    ) -> Result<Option<PromotionCarryover>, StoreError>;

    /// Every promotion of the student, oldest first
    async fn list_carryovers_for_student(&self, student_id: StudentId) -> Result<Vec<PromotionCarryover>, StoreError>;

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError>;
}
