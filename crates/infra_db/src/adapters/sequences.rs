//! PostgreSQL Sequence Generator
//!
//! Reference numbers (invoice numbers, payment references) are drawn from
//! per-series, per-year counters in `ledger_sequences`. The upsert below
//! is a single statement, so two concurrent callers never receive the same
//! value.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use core_kernel::{DomainPort, PortError, SequenceGenerator};

use crate::error::DatabaseError;

#[derive(Debug, Clone)]
pub struct PostgresSequenceGenerator {
    pool: PgPool,
}

impl PostgresSequenceGenerator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DomainPort for PostgresSequenceGenerator {}

#[async_trait]
impl SequenceGenerator for PostgresSequenceGenerator {
    #[instrument(skip(self))]
    async fn next_value(&self, series: &str, year: i32) -> Result<u64, PortError> {
        let value: i64 = sqlx::query_scalar(
            "INSERT INTO ledger_sequences (series, year, last_value) VALUES ($1, $2, 1) \
             ON CONFLICT (series, year) \
             DO UPDATE SET last_value = ledger_sequences.last_value + 1 \
             RETURNING last_value",
        )
        .bind(series)
        .bind(year)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        debug!(value, "Issued sequence value");
        u64::try_from(value).map_err(|_| PortError::internal(format!("sequence {} went negative", series)))
    }
}
