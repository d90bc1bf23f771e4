//! PostgreSQL Ledger Store
//!
//! Implements [`LedgerStore`] over a single `ledger_records` table. Each
//! entity is stored as a JSONB body next to the columns queries filter on
//! (kind, owning student, parent row, natural key, status) and a version.
//!
//! # Commit protocol
//!
//! A change set is applied in one SQL transaction:
//!
//! - inserts use `INSERT` and rely on the primary key and the natural-key
//!   unique index to reject duplicates
//! - updates use `UPDATE ... WHERE version = $expected`; zero rows affected
//!   means another writer got there first
//! - fee deletions use `DELETE ... WHERE version = $expected`
//!
//! Any failure drops the transaction, which rolls everything back.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{
    DomainPort, FeeCategoryId, FeeTemplateId, InvoiceId, PaymentId, StudentFeeId, StudentId,
    TermId,
};
use domain_billing::store::{ChangeSet, Record, RecordKind, StoreError, Write};
use domain_billing::{
    FeeCategory, FeeTemplate, Invoice, LedgerStore, Payment, PaymentAdjustment,
    PromotionCarryover, StudentFee,
};

use crate::error::DatabaseError;

const NATURAL_KEY_INDEX: &str = "ledger_records_natural_key";

/// PostgreSQL-backed implementation of the ledger store port
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one<R: Record>(&self, id: Uuid) -> Result<Option<R>, StoreError> {
        let row: Option<(Value, i64)> =
            sqlx::query_as("SELECT body, version FROM ledger_records WHERE kind = $1 AND id = $2")
                .bind(R::KIND.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from)?;
        row.map(decode).transpose()
    }

    async fn fetch_kind<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let rows: Vec<(Value, i64)> =
            sqlx::query_as("SELECT body, version FROM ledger_records WHERE kind = $1 ORDER BY recorded_at, id")
                .bind(R::KIND.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(DatabaseError::from)?;
        rows.into_iter().map(decode).collect()
    }

    async fn fetch_by_key<R: Record>(&self, key: &str) -> Result<Option<R>, StoreError> {
        let row: Option<(Value, i64)> = sqlx::query_as(
            "SELECT body, version FROM ledger_records WHERE kind = $1 AND natural_key = $2",
        )
        .bind(R::KIND.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        row.map(decode).transpose()
    }

    async fn fetch_by_student<R: Record>(&self, student_id: StudentId) -> Result<Vec<R>, StoreError> {
        let rows: Vec<(Value, i64)> = sqlx::query_as(
            "SELECT body, version FROM ledger_records \
             WHERE kind = $1 AND student_id = $2 ORDER BY recorded_at, id",
        )
        .bind(R::KIND.as_str())
        .bind(*student_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        rows.into_iter().map(decode).collect()
    }

    async fn fetch_by_status<R: Record>(&self, statuses: &[&str]) -> Result<Vec<R>, StoreError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let rows: Vec<(Value, i64)> = sqlx::query_as(
            "SELECT body, version FROM ledger_records \
             WHERE kind = $1 AND status = ANY($2) ORDER BY recorded_at, id",
        )
        .bind(R::KIND.as_str())
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        rows.into_iter().map(decode).collect()
    }
}

/// Rebuilds an entity from its body; the version column is authoritative
fn decode<R: Record>((body, version): (Value, i64)) -> Result<R, StoreError> {
    let mut record: R = serde_json::from_value(body)?;
    record.set_version(from_column(version)?);
    Ok(record)
}

fn to_column(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Serialization(format!("version {} overflows BIGINT", version)))
}

fn from_column(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|_| StoreError::Serialization(format!("negative version {}", version)))
}

async fn stored_version(conn: &mut PgConnection, kind: RecordKind, id: Uuid) -> Result<Option<u64>, StoreError> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM ledger_records WHERE kind = $1 AND id = $2")
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(DatabaseError::from)?;
    version.map(from_column).transpose()
}

/// Translates a unique violation into the store's conflict vocabulary
fn unique_violation<R: Record>(error: sqlx::Error, record: &R, expected: u64) -> StoreError {
    match DatabaseError::from(error) {
        DatabaseError::DuplicateEntry { constraint, .. } if constraint == NATURAL_KEY_INDEX => {
            StoreError::Duplicate {
                kind: R::KIND,
                key: record.natural_key().unwrap_or_default(),
            }
        }
        DatabaseError::DuplicateEntry { .. } => StoreError::Conflict {
            kind: R::KIND,
            id: record.record_id(),
            expected,
            found: None,
        },
        other => other.into(),
    }
}

async fn apply_writes<R: Record>(conn: &mut PgConnection, writes: Vec<Write<R>>) -> Result<(), StoreError> {
    for write in writes {
        let expected = write.expected_version();
        let mut record = write.into_record();
        let id = record.record_id();
        let base = expected.unwrap_or(0);
        if expected.is_none() && record.version() != 0 {
            return Err(StoreError::Conflict {
                kind: R::KIND,
                id,
                expected: 0,
                found: Some(record.version()),
            });
        }
        record.set_version(base + 1);
        let body = serde_json::to_value(&record)?;
        let student = record.student_id().map(|s| *s.as_uuid());

        match expected {
            None => {
                sqlx::query(
                    "INSERT INTO ledger_records \
                     (kind, id, student_id, parent_id, natural_key, status, version, body) \
                     VALUES ($1, $2, $3, $4, $5, $6, 1, $7)",
                )
                .bind(R::KIND.as_str())
                .bind(id)
                .bind(student)
                .bind(record.parent_id())
                .bind(record.natural_key())
                .bind(record.status_label())
                .bind(body)
                .execute(&mut *conn)
                .await
                .map_err(|e| unique_violation(e, &record, 0))?;
            }
            Some(version) => {
                let result = sqlx::query(
                    "UPDATE ledger_records SET \
                     student_id = $3, parent_id = $4, natural_key = $5, status = $6, \
                     version = version + 1, body = $7, updated_at = now() \
                     WHERE kind = $1 AND id = $2 AND version = $8",
                )
                .bind(R::KIND.as_str())
                .bind(id)
                .bind(student)
                .bind(record.parent_id())
                .bind(record.natural_key())
                .bind(record.status_label())
                .bind(body)
                .bind(to_column(version)?)
                .execute(&mut *conn)
                .await
                .map_err(|e| unique_violation(e, &record, version))?;

                if result.rows_affected() == 0 {
                    return Err(StoreError::Conflict {
                        kind: R::KIND,
                        id,
                        expected: version,
                        found: stored_version(conn, R::KIND, id).await?,
                    });
                }
            }
        }
    }
    Ok(())
}

impl DomainPort for PostgresLedgerStore {}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_category(&self, id: FeeCategoryId) -> Result<Option<FeeCategory>, StoreError> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn get_template(&self, id: FeeTemplateId) -> Result<Option<FeeTemplate>, StoreError> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn list_templates(&self) -> Result<Vec<FeeTemplate>, StoreError> {
        let mut templates: Vec<FeeTemplate> = self.fetch_kind().await?;
        templates.sort_by_key(|t| (t.created_at, t.id));
        Ok(templates)
    }

    async fn get_fee(&self, id: StudentFeeId) -> Result<Option<StudentFee>, StoreError> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn list_fees_for_student(&self, student_id: StudentId) -> Result<Vec<StudentFee>, StoreError> {
        let mut fees: Vec<StudentFee> = self.fetch_by_student(student_id).await?;
        fees.sort_by_key(|f| (f.created_at, f.id));
        Ok(fees)
    }

    #[instrument(skip(self))]
    async fn list_unsettled_fees(&self) -> Result<Vec<StudentFee>, StoreError> {
        let mut fees: Vec<StudentFee> = self.fetch_by_status(&["Pending", "Partial", "Overdue"]).await?;
        fees.sort_by_key(|f| (f.due_date, f.id));
        debug!(count = fees.len(), "Loaded unsettled fees");
        Ok(fees)
    }

    async fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn find_invoice_by_number(&self, number: &str) -> Result<Option<Invoice>, StoreError> {
        self.fetch_by_key(number).await
    }

    async fn list_invoices_for_student(&self, student_id: StudentId) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices: Vec<Invoice> = self.fetch_by_student(student_id).await?;
        invoices.sort_by(|a, b| (a.created_at, &a.invoice_number).cmp(&(b.created_at, &b.invoice_number)));
        Ok(invoices)
    }

    async fn list_outstanding_invoices(
        &self,
        student_id: Option<StudentId>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices: Vec<Invoice> = self.fetch_by_status(&["Open", "PartiallyPaid"]).await?;
        if let Some(student_id) = student_id {
            invoices.retain(|i| i.student_id == student_id);
        }
        invoices.sort_by(|a, b| (a.created_at, &a.invoice_number).cmp(&(b.created_at, &b.invoice_number)));
        Ok(invoices)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn list_payments_for_student(&self, student_id: StudentId) -> Result<Vec<Payment>, StoreError> {
        let mut payments: Vec<Payment> = self.fetch_by_student(student_id).await?;
        payments.sort_by_key(|p| (p.payment_date(), p.recorded_at(), p.id()));
        Ok(payments)
    }

    async fn list_adjustments(&self, payment_id: PaymentId) -> Result<Vec<PaymentAdjustment>, StoreError> {
        let rows: Vec<(Value, i64)> = sqlx::query_as(
            "SELECT body, version FROM ledger_records WHERE kind = $1 AND parent_id = $2",
        )
        .bind(RecordKind::PaymentAdjustment.as_str())
        .bind(*payment_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        let mut adjustments: Vec<PaymentAdjustment> =
            rows.into_iter().map(decode).collect::<Result<_, _>>()?;
        adjustments.sort_by_key(|a| a.sequence);
        Ok(adjustments)
    }

    async fn find_carryover(
        &self,
        student_id: StudentId,
        destination_term: TermId,
    ) -> Result<Option<PromotionCarryover>, StoreError> {
        self.fetch_by_key(&PromotionCarryover::promotion_key(student_id, destination_term))
            .await
    }

    async fn list_carryovers_for_student(&self, student_id: StudentId) -> Result<Vec<PromotionCarryover>, StoreError> {
        self.fetch_by_student(student_id).await
    }

    #[instrument(skip(self, changes), fields(writes = changes.len()))]
    async fn commit(&self, changes: ChangeSet) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        for deletion in &changes.fee_deletions {
            let id = *deletion.id.as_uuid();
            let result = sqlx::query("DELETE FROM ledger_records WHERE kind = $1 AND id = $2 AND version = $3")
                .bind(RecordKind::StudentFee.as_str())
                .bind(id)
                .bind(to_column(deletion.expected_version)?)
                .execute(&mut *tx)
                .await
                .map_err(DatabaseError::from)?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict {
                    kind: RecordKind::StudentFee,
                    id,
                    expected: deletion.expected_version,
                    found: stored_version(&mut tx, RecordKind::StudentFee, id).await?,
                });
            }
        }

        apply_writes(&mut tx, changes.categories).await?;
        apply_writes(&mut tx, changes.templates).await?;
        apply_writes(&mut tx, changes.fees).await?;
        apply_writes(&mut tx, changes.invoices).await?;
        apply_writes(&mut tx, changes.payments).await?;
        apply_writes(&mut tx, changes.adjustments).await?;
        apply_writes(&mut tx, changes.carryovers).await?;

        tx.commit()
            .await
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;
        debug!("Committed change set");
        Ok(())
    }
}
