//! Ledger configuration

use serde::Deserialize;

use core_kernel::{Currency, Timezone};

/// Tunables for the ledger service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Reload-and-retry attempts after a version conflict
    pub max_conflict_retries: u32,
    /// Base backoff between retries; multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// School-local timezone used to decide what "today" is
    pub timezone: Timezone,
    /// First month of the fiscal year, used in invoice numbers
    pub fiscal_year_start_month: u32,
    pub invoice_prefix: String,
    pub payment_prefix: String,
    /// Currency for zero-balance carryover records
    pub default_currency: Currency,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            retry_backoff_ms: 10,
            timezone: Timezone::default(),
            fiscal_year_start_month: 1,
            invoice_prefix: "INV".to_string(),
            payment_prefix: "PAY".to_string(),
            default_currency: Currency::USD,
        }
    }
}

impl LedgerConfig {
    pub fn with_retries(mut self, max_conflict_retries: u32, retry_backoff_ms: u64) -> Self {
        self.max_conflict_retries = max_conflict_retries;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }
}
