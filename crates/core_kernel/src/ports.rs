//! Ports consumed by the billing core
//!
//! The ledger never reads ambient state. Time, the acting user and
//! human-readable sequence numbers are supplied through the traits in this
//! module so that every rule can be exercised deterministically in tests.
//!
//! ```text
//!   ┌──────────────────────────────┐
//!   │        LedgerService         │
//!   └──────────────────────────────┘
//!      │            │           │
//!      ▼            ▼           ▼
//!    Clock    ActorContext  SequenceGenerator
//!      │            │           │
//!  System/Fixed  session    Postgres / in-memory
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::identifiers::ActorId;
use crate::temporal::Timezone;

/// Error type for port operations
#[derive(Debug, Error)]
pub enum PortError {
    /// The requested entity was not found
    #[error("Not found: {entity_type} with id {id}")]
    NotFound {
        entity_type: String,
        id: String,
    },

    /// Connection to the underlying system failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An internal error occurred
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PortError {
    /// Creates a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: impl fmt::Display) -> Self {
        PortError::NotFound {
            entity_type: entity_type.into(),
            id: id.to_string(),
        }
    }

    /// Creates a Connection error
    pub fn connection(message: impl Into<String>) -> Self {
        PortError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        PortError::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Returns true if this error indicates a transient failure that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, PortError::Connection { .. })
    }
}

/// Marker trait for all domain ports
///
/// All port traits extend this marker so they can be shared across tasks.
pub trait DomainPort: Send + Sync + 'static {}

// ============================================================================
// Clock
// ============================================================================

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The school-local calendar date for `now()`
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock reporting dates in the school's timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    timezone: Timezone,
}

impl SystemClock {
    pub fn new(timezone: Timezone) -> Self {
        Self { timezone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        self.timezone.local_date(Utc::now())
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct FixedClock {
    instant: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: RwLock::new(instant),
        }
    }

    /// Starts the clock at midday UTC on `date`
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(date.and_time(chrono::NaiveTime::MIN).and_utc() + Duration::hours(12))
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        match self.instant.write() {
            Ok(mut guard) => *guard = instant,
            Err(poisoned) => *poisoned.into_inner() = instant,
        }
    }

    pub fn advance(&self, by: Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.instant.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ============================================================================
// Actor / permission check
// ============================================================================

/// The user on whose behalf a command runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub display_name: String,
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: ActorId::new_v7(),
            display_name: display_name.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

/// Identity and capability check supplied by the hosting application
///
/// The ledger stamps `created_by`/`confirmed_by`/`voided_by` from
/// `current_actor` and asks `has_permission` before elevated operations.
/// Authorization policy itself lives outside the core.
pub trait ActorContext: Send + Sync {
    fn current_actor(&self) -> Actor;

    fn has_permission(&self, permission: &str) -> bool;
}

/// An actor with a fixed permission set
#[derive(Debug, Clone)]
pub struct StaticActorContext {
    actor: Actor,
    permissions: HashSet<String>,
}

impl StaticActorContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            permissions: HashSet::new(),
        }
    }

    pub fn grant(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }
}

impl ActorContext for StaticActorContext {
    fn current_actor(&self) -> Actor {
        self.actor.clone()
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

// ============================================================================
// Sequence generator
// ============================================================================

/// Produces collision-free, monotonically increasing sequence values
///
/// Values are scoped by series (e.g. `PAY`, `INV`) and year, so each year's
/// references restart at 1.
#[async_trait]
pub trait SequenceGenerator: DomainPort {
    /// Reserves the next value of a series
    ///
    /// # Arguments
    ///
    /// * `series` - Reference prefix, e.g. `PAY`
    /// * `year` - Year the series is scoped to
    ///
    /// # Returns
    ///
    /// A value never handed out before for this series and year, starting at 1
    async fn next_value(&self, series: &str, year: i32) -> Result<u64, PortError>;
}

/// Formats a human-readable reference such as `PAY-2026-00042`
///
/// # Arguments
///
/// * `series` - Reference prefix
/// * `year` - Year segment
/// * `value` - Sequence value, zero-padded to five digits
pub fn format_reference(series: &str, year: i32, value: u64) -> String {
    format!("{}-{}-{:05}", series, year, value)
}

/// Process-local sequence generator
#[derive(Debug, Default)]
pub struct InMemorySequenceGenerator {
    counters: Mutex<HashMap<(String, i32), u64>>,
}

impl InMemorySequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DomainPort for InMemorySequenceGenerator {}

#[async_trait]
impl SequenceGenerator for InMemorySequenceGenerator {
    async fn next_value(&self, series: &str, year: i32) -> Result<u64, PortError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry((series.to_string(), year)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_reference_pads_sequence() {
        assert_eq!(format_reference("PAY", 2026, 42), "PAY-2026-00042");
        assert_eq!(format_reference("INV", 2026, 123456), "INV-2026-123456");
    }

    #[tokio::test]
    async fn test_in_memory_sequence_is_scoped_by_series_and_year() {
        let generator = InMemorySequenceGenerator::new();
        assert_eq!(generator.next_value("PAY", 2026).await.unwrap(), 1);
        assert_eq!(generator.next_value("PAY", 2026).await.unwrap(), 2);
        assert_eq!(generator.next_value("INV", 2026).await.unwrap(), 1);
        assert_eq!(generator.next_value("PAY", 2027).await.unwrap(), 1);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::at_date(NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
        clock.advance(Duration::days(3));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 13).unwrap());
    }

    #[test]
    fn test_static_actor_permissions() {
        let ctx = StaticActorContext::new(Actor::new("Bursar").with_role("finance"))
            .grant("ledger.payments.adjust");
        assert!(ctx.has_permission("ledger.payments.adjust"));
        assert!(!ctx.has_permission("ledger.templates.manage"));
        assert_eq!(ctx.current_actor().roles, vec!["finance".to_string()]);
    }

    #[test]
    fn test_port_error_transient() {
        assert!(PortError::connection("refused").is_transient());
        assert!(!PortError::not_found("Sequence", "PAY").is_transient());
    }
}
