//! In-memory ledger store
//!
//! Tables are plain hash maps behind a single `tokio::sync::RwLock`. A commit
//! validates every staged write under the write lock before applying any of
//! them, which gives the same all-or-nothing behavior as a SQL transaction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use core_kernel::{
    DomainPort, FeeCategoryId, FeeTemplateId, InvoiceId, PaymentId, StudentFeeId, StudentId, TermId,
};

use crate::catalog::{FeeCategory, FeeTemplate};
use crate::invoice::{Invoice, InvoiceStatus};
use crate::payment::{Payment, PaymentAdjustment};
use crate::promotion::PromotionCarryover;
use crate::store::{ChangeSet, LedgerStore, Record, StoreError, Write};
use crate::student_fee::{FeeStatus, StudentFee};

#[derive(Debug, Default)]
struct Tables {
    categories: HashMap<Uuid, FeeCategory>,
    templates: HashMap<Uuid, FeeTemplate>,
    fees: HashMap<Uuid, StudentFee>,
    invoices: HashMap<Uuid, Invoice>,
    payments: HashMap<Uuid, Payment>,
    adjustments: HashMap<Uuid, PaymentAdjustment>,
    carryovers: HashMap<Uuid, PromotionCarryover>,
}

/// Process-local [`LedgerStore`]
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with `StoreError::Unavailable` until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of commits rejected for a stale version or taken key
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }

    fn validate(tables: &Tables, changes: &ChangeSet) -> Result<(), StoreError> {
        check_writes(&tables.categories, &changes.categories)?;
        check_writes(&tables.templates, &changes.templates)?;
        check_writes(&tables.fees, &changes.fees)?;
        check_writes(&tables.invoices, &changes.invoices)?;
        check_writes(&tables.payments, &changes.payments)?;
        check_writes(&tables.adjustments, &changes.adjustments)?;
        check_writes(&tables.carryovers, &changes.carryovers)?;

        for deletion in &changes.fee_deletions {
            let id = *deletion.id.as_uuid();
            let found = tables.fees.get(&id).map(Record::version);
            if found != Some(deletion.expected_version) {
                return Err(StoreError::Conflict {
                    kind: StudentFee::KIND,
                    id,
                    expected: deletion.expected_version,
                    found,
                });
            }
        }
        Ok(())
    }
}

fn check_writes<R: Record>(table: &HashMap<Uuid, R>, writes: &[Write<R>]) -> Result<(), StoreError> {
    let mut ids = HashSet::new();
    let mut keys = HashSet::new();

    for write in writes {
        let record = write.record();
        let id = record.record_id();
        if !ids.insert(id) {
            return Err(StoreError::Duplicate {
                kind: R::KIND,
                key: format!("row {} staged twice", id),
            });
        }

        let found = table.get(&id).map(Record::version);
        let stale = match write {
            Write::Insert(r) => found.is_some() || r.version() != 0,
            Write::Update(r) => found != Some(r.version()),
        };
        if stale {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                id,
                expected: write.expected_version().unwrap_or(0),
                found,
            });
        }

        if let Some(key) = record.natural_key() {
            let taken = table
                .values()
                .any(|existing| existing.record_id() != id && existing.natural_key().as_deref() == Some(key.as_str()));
            if taken || !keys.insert(key.clone()) {
                return Err(StoreError::Duplicate { kind: R::KIND, key });
            }
        }
    }
    Ok(())
}

fn apply_writes<R: Record>(table: &mut HashMap<Uuid, R>, writes: Vec<Write<R>>) {
    for write in writes {
        let mut record = write.into_record();
        let next = record.version() + 1;
        record.set_version(next);
        table.insert(record.record_id(), record);
    }
}

fn sorted<R, K: Ord>(rows: impl Iterator<Item = R>, key: impl Fn(&R) -> K) -> Vec<R> {
    let mut rows: Vec<R> = rows.collect();
    rows.sort_by_key(|r| key(r));
    rows
}

impl DomainPort for InMemoryLedgerStore {}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_category(&self, id: FeeCategoryId) -> Result<Option<FeeCategory>, StoreError> {
        self.ensure_available()?;
        Ok(self.tables.read().await.categories.get(id.as_uuid()).cloned())
    }

    async fn get_template(&self, id: FeeTemplateId) -> Result<Option<FeeTemplate>, StoreError> {
        self.ensure_available()?;
        Ok(self.tables.read().await.templates.get(id.as_uuid()).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<FeeTemplate>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(tables.templates.values().cloned(), |t| (t.created_at, t.id)))
    }

    async fn get_fee(&self, id: StudentFeeId) -> Result<Option<StudentFee>, StoreError> {
        self.ensure_available()?;
        Ok(self.tables.read().await.fees.get(id.as_uuid()).cloned())
    }

    async fn list_fees_for_student(&self, student_id: StudentId) -> Result<Vec<StudentFee>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(
            tables.fees.values().filter(|f| f.student_id == student_id).cloned(),
            |f| (f.created_at, f.id),
        ))
    }

    async fn list_unsettled_fees(&self) -> Result<Vec<StudentFee>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(
            tables
                .fees
                .values()
                .filter(|f| matches!(f.status, FeeStatus::Pending | FeeStatus::Partial | FeeStatus::Overdue))
                .cloned(),
            |f| (f.due_date, f.id),
        ))
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        self.ensure_available()?;
        Ok(self.tables.read().await.invoices.get(id.as_uuid()).cloned())
    }

    async fn find_invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(tables.invoices.values().find(|i| i.invoice_number == number).cloned())
    }

    async fn list_invoices_for_student(&self, student_id: StudentId) -> Result<Vec<Invoice>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(
            tables.invoices.values().filter(|i| i.student_id == student_id).cloned(),
            |i| (i.created_at, i.invoice_number.clone()),
        ))
    }

    async fn list_outstanding_invoices(
        &self,
        student_id: Option<StudentId>,
    ) -> Result<Vec<Invoice>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(
            tables
                .invoices
                .values()
                .filter(|i| matches!(i.status, InvoiceStatus::Open | InvoiceStatus::PartiallyPaid))
                .filter(|i| student_id.map_or(true, |s| i.student_id == s))
                .cloned(),
            |i| (i.created_at, i.invoice_number.clone()),
        ))
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        self.ensure_available()?;
        Ok(self.tables.read().await.payments.get(id.as_uuid()).cloned())
    }

    async fn list_payments_for_student(&self, student_id: StudentId) -> Result<Vec<Payment>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(
            tables.payments.values().filter(|p| p.student_id() == student_id).cloned(),
            |p| (p.payment_date(), p.recorded_at(), p.id()),
        ))
    }

    async fn list_adjustments(&self, payment_id: PaymentId) -> Result<Vec<PaymentAdjustment>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(
            tables.adjustments.values().filter(|a| a.payment_id == payment_id).cloned(),
            |a| a.sequence,
        ))
    }

    async fn find_carryover(
        &self,
        student_id: StudentId,
        destination_term: TermId,
    ) -> Result<Option<PromotionCarryover>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(tables
            .carryovers
            .values()
            .find(|c| c.student_id == student_id && c.destination_term == destination_term)
            .cloned())
    }

    async fn list_carryovers_for_student(&self, student_id: StudentId) -> Result<Vec<PromotionCarryover>, StoreError> {
        self.ensure_available()?;
        let tables = self.tables.read().await;
        Ok(sorted(
            tables.carryovers.values().filter(|c| c.student_id == student_id).cloned(),
            |c| (c.created_at, c.id),
        ))
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        self.ensure_available()?;
        let mut tables = self.tables.write().await;

        if let Err(err) = Self::validate(&tables, &changes) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            debug!(error = %err, "Rejected change set");
            return Err(err);
        }

        let writes = changes.len();
        for deletion in &changes.fee_deletions {
            tables.fees.remove(deletion.id.as_uuid());
        }
        apply_writes(&mut tables.categories, changes.categories);
        apply_writes(&mut tables.templates, changes.templates);
        apply_writes(&mut tables.fees, changes.fees);
        apply_writes(&mut tables.invoices, changes.invoices);
        apply_writes(&mut tables.payments, changes.payments);
        apply_writes(&mut tables.adjustments, changes.adjustments);
        apply_writes(&mut tables.carryovers, changes.carryovers);

        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(writes, "Committed change set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::committed;
    use chrono::Utc;
    use core_kernel::{ActorId, Currency, Money};

    fn carryover(student: StudentId, destination: TermId) -> PromotionCarryover {
        PromotionCarryover::new(
            student,
            TermId::new(),
            destination,
            Money::zero(Currency::USD),
            None,
            ActorId::new(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_stale_update_conflicts() {
        let store = InMemoryLedgerStore::new();
        let c = carryover(StudentId::new(), TermId::new());

        let mut changes = ChangeSet::new();
        changes.insert(c.clone());
        store.commit(changes).await.unwrap();

        let stored = store
            .find_carryover(c.student_id, c.destination_term)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1);

        // Written against version 0 after the row moved to 1
        let mut stale = ChangeSet::new();
        stale.update(c.clone());
        let err = store.commit(stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 0, found: Some(1), .. }));

        let mut fresh = ChangeSet::new();
        fresh.update(stored);
        store.commit(fresh).await.unwrap();
        assert_eq!(store.commit_count(), 2);
        assert_eq!(store.conflict_count(), 1);
    }

    #[tokio::test]
    async fn test_natural_key_is_unique() {
        let store = InMemoryLedgerStore::new();
        let student = StudentId::new();
        let term = TermId::new();

        let mut first = ChangeSet::new();
        first.insert(carryover(student, term));
        store.commit(first).await.unwrap();

        let mut second = ChangeSet::new();
        second.insert(carryover(student, term));
        assert!(matches!(
            store.commit(second).await,
            Err(StoreError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_commit_applies_nothing() {
        let store = InMemoryLedgerStore::new();
        let student = StudentId::new();
        let ok = carryover(student, TermId::new());
        let never_inserted = committed(carryover(student, TermId::new()));

        let mut changes = ChangeSet::new();
        changes.insert(ok.clone());
        changes.update(never_inserted);
        assert!(store.commit(changes).await.is_err());
        assert!(store
            .find_carryover(student, ok.destination_term)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = InMemoryLedgerStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.list_templates().await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.list_templates().await.unwrap().is_empty());
    }
}
