//! Core Kernel - Foundational types for the tuition billing ledger
//!
//! This crate provides the building blocks shared by the ledger crates:
//! - Money types with precise decimal arithmetic (USD and KHR)
//! - Date helpers for due dates, grace periods and catalog windows
//! - Strongly-typed identifiers
//! - Ports for the clock, acting user and reference sequences

pub mod money;
pub mod temporal;
pub mod identifiers;
pub mod error;
pub mod ports;

pub use money::{Money, Currency, MoneyError, Rate};
pub use temporal::{EffectivePeriod, TemporalError, Timezone};
pub use identifiers::{
    ActorId, AdjustmentId, CarryoverId, EnrollmentId, FeeCategoryId, FeeTemplateId,
    InvoiceId, InvoiceLineId, PaymentId, StudentFeeId, StudentId, TermId,
};
pub use error::CoreError;
pub use ports::{
    Actor, ActorContext, Clock, DomainPort, FixedClock, InMemorySequenceGenerator, PortError,
    SequenceGenerator, StaticActorContext, SystemClock,
};
