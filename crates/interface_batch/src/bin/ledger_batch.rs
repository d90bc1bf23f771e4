//! Tuition Ledger - Batch Runner
//!
//! Runs the nightly late-fee sweep against the PostgreSQL ledger.
//!
//! # Usage
//!
//! ```bash
//! LEDGER_DATABASE_URL=postgres://... ledger-batch
//!
//! # Re-run a missed night
//! LEDGER_AS_OF=2026-02-01 ledger-batch
//! ```
//!
//! # Environment Variables
//!
//! * `LEDGER_DATABASE_URL` - PostgreSQL connection string
//! * `LEDGER_MAX_CONNECTIONS` - Pool size (default: 5)
//! * `LEDGER_LOG_LEVEL` - Filter used when `RUST_LOG` is unset (default: info)
//! * `LEDGER_LOG_FORMAT` - `text` or `json` (default: text)
//! * `LEDGER_AS_OF` - Sweep date, `YYYY-MM-DD` (default: today in the school timezone)
//! * `LEDGER_LEDGER__TIMEZONE` - IANA timezone of the school (default: UTC)

use anyhow::Context;

use core_kernel::{Clock, SystemClock};
use interface_batch::config::BatchConfig;
use interface_batch::{connect, run_late_fee_accrual, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real deployments set the environment directly
    dotenvy::dotenv().ok();

    let config = BatchConfig::from_env().context("loading LEDGER_* configuration")?;
    telemetry::init_tracing(&config.log_level, config.log_format)?;

    let as_of = config
        .as_of
        .unwrap_or_else(|| SystemClock::new(config.ledger.timezone).today());
    tracing::info!(%as_of, timezone = config.ledger.timezone.0.name(), "Starting ledger batch");

    let service = connect(&config).await?;
    let report = run_late_fee_accrual(&service, as_of).await?;

    tracing::info!(applied = report.applied, "Ledger batch complete");
    Ok(())
}
