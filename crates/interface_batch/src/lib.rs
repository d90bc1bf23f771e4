//! Ledger Batch Jobs
//!
//! Wiring for the `ledger-batch` binary: configuration, logging and the
//! jobs it runs against a [`LedgerService`].
//!
//! # Jobs
//!
//! - **Late-fee accrual**: sweeps every unsettled fee and charges its late
//!   fee once the grace period has passed. Safe to re-run for the same day.

pub mod config;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{info, instrument, warn};

use core_kernel::{Clock, SystemClock};
use domain_billing::{BillingError, LateFeeBatchReport, LedgerService};
use infra_db::{create_pool, run_migrations, PostgresLedgerStore, PostgresSequenceGenerator};

use crate::config::BatchConfig;

/// Why a batch run ended badly
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("late-fee sweep failed: {0}")]
    Sweep(#[from] BillingError),

    #[error("{failed} of {examined} fees could not be updated")]
    PartialFailure { failed: usize, examined: usize },
}

/// Connects to the database and builds a service over the SQL adapters
pub async fn connect(config: &BatchConfig) -> anyhow::Result<LedgerService> {
    let pool = create_pool(config.database())
        .await
        .context("connecting to the ledger database")?;
    run_migrations(&pool).await.context("applying ledger migrations")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.ledger.timezone));
    Ok(LedgerService::new(
        Arc::new(PostgresLedgerStore::new(pool.clone())),
        clock,
        Arc::new(PostgresSequenceGenerator::new(pool)),
        config.ledger.clone(),
    ))
}

/// Runs the late-fee sweep and logs its outcome
///
/// Per-fee failures do not stop the sweep; they are reported afterwards as
/// [`BatchError::PartialFailure`] so the scheduler sees a failed run.
#[instrument(skip(service), fields(as_of = %as_of))]
pub async fn run_late_fee_accrual(
    service: &LedgerService,
    as_of: NaiveDate,
) -> Result<LateFeeBatchReport, BatchError> {
    let report = service.accrue_late_fees(as_of).await.into_result()?;

    info!(
        examined = report.examined,
        applied = report.applied,
        skipped = report.skipped,
        failed = report.failed.len(),
        "Late-fee sweep finished"
    );
    for (fee_id, reason) in &report.failed {
        warn!(fee_id = %fee_id, %reason, "Fee left unchanged");
    }

    if !report.failed.is_empty() {
        return Err(BatchError::PartialFailure {
            failed: report.failed.len(),
            examined: report.examined,
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_message() {
        let err = BatchError::PartialFailure { failed: 2, examined: 10 };
        assert_eq!(err.to_string(), "2 of 10 fees could not be updated");
    }
}
