//! Billing domain errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

use core_kernel::{CoreError, MoneyError, PortError, TemporalError};

use crate::store::StoreError;

/// Broad classification of a rejected command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed input, rejected before any mutation
    Validation,
    /// The request conflicts with a business rule or state machine
    StateConflict,
    /// A referenced entity does not exist
    NotFound,
    /// Optimistic concurrency retries were exhausted
    ConcurrencyConflict,
    /// The store or another port failed
    Infrastructure,
    /// A computed balance broke a ledger invariant
    InvariantViolation,
}

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    // --- Validation ---
    /// Amount is zero, negative or otherwise unusable
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A required reference was not supplied
    #[error("Missing reference: {0}")]
    MissingReference(String),

    /// Amounts in different currencies were combined
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        expected: String,
        actual: String,
    },

    /// An entity belongs to a different student
    #[error("{entity} {id} does not belong to student {student}")]
    StudentMismatch {
        entity: &'static str,
        id: String,
        student: String,
    },

    /// Request data failed validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // --- State conflicts ---
    /// The entity is in a final state for this operation
    #[error("{entity} {id} is already {status}")]
    AlreadyFinal {
        entity: &'static str,
        id: String,
        status: String,
    },

    /// Invoice no longer accepts line items
    #[error("Invoice {invoice} is {status} and no longer accepts changes")]
    InvoiceClosed {
        invoice: String,
        status: String,
    },

    /// A carryover already exists for the destination term
    #[error("Student {student} has already been promoted into term {term}")]
    AlreadyPromoted {
        student: String,
        term: String,
    },

    /// The source term's balance already went to another term
    #[error("Student {student} already carried term {term} forward into term {destination}")]
    AlreadyCarriedForward {
        student: String,
        term: String,
        destination: String,
    },

    /// Allocation would exceed the outstanding balance
    #[error("Allocation of {requested} exceeds outstanding {outstanding} on {target}")]
    OverAllocation {
        target: String,
        requested: String,
        outstanding: String,
    },

    /// Fee cannot be waived in its current state
    #[error("Fee {fee} cannot be waived: {reason}")]
    CannotWaive {
        fee: String,
        reason: String,
    },

    /// Fee has had a payment allocated against it
    #[error("Fee {0} has payments allocated against it")]
    HasPayments(String),

    /// Discount larger than what remains unpaid
    #[error("Discount {discount} exceeds outstanding {outstanding} on invoice {invoice}")]
    DiscountExceedsOutstanding {
        invoice: String,
        discount: String,
        outstanding: String,
    },

    /// More than one template matched with equal specificity
    #[error("Ambiguous fee template; equally specific candidates: {}", candidates.join(", "))]
    AmbiguousTemplate {
        candidates: Vec<String>,
    },

    /// Fee is already billed on a live invoice
    #[error("Fee {fee} is already billed on invoice {invoice}")]
    FeeAlreadyInvoiced {
        fee: String,
        invoice: String,
    },

    /// Invoice has allocations and cannot be cancelled
    #[error("Invoice {0} has allocated payments")]
    InvoiceHasPayments(String),

    /// The actor lacks a required permission
    #[error("Permission denied: {permission} is required")]
    PermissionDenied {
        permission: String,
    },

    // --- Lookup ---
    /// Referenced entity is absent
    #[error("{entity} not found: {id}")]
    NotFound {
        entity: &'static str,
        id: String,
    },

    // --- Concurrency / infrastructure ---
    /// A concurrent writer changed the rows this command read
    #[error("Concurrent modification: {0}")]
    ConcurrencyConflict(String),

    /// Store or port failure
    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    /// A ledger invariant would be broken
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl BillingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        BillingError::InvalidRequest(message.into())
    }

    /// Returns the classification used in command results
    pub fn kind(&self) -> ErrorKind {
        use BillingError::*;
        match self {
            InvalidAmount(_)
            | MissingReference(_)
            | CurrencyMismatch { .. }
            | StudentMismatch { .. }
            | InvalidRequest(_) => ErrorKind::Validation,
            AlreadyFinal { .. }
            | InvoiceClosed { .. }
            | AlreadyPromoted { .. }
            | AlreadyCarriedForward { .. }
            | OverAllocation { .. }
            | CannotWaive { .. }
            | HasPayments(_)
            | DiscountExceedsOutstanding { .. }
            | AmbiguousTemplate { .. }
            | FeeAlreadyInvoiced { .. }
            | InvoiceHasPayments(_)
            | PermissionDenied { .. } => ErrorKind::StateConflict,
            NotFound { .. } => ErrorKind::NotFound,
            ConcurrencyConflict(_) => ErrorKind::ConcurrencyConflict,
            Infrastructure(_) => ErrorKind::Infrastructure,
            InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }
}

impl From<MoneyError> for BillingError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyMismatch(expected, actual) => {
                BillingError::CurrencyMismatch { expected, actual }
            }
            MoneyError::InvalidAmount(msg) => BillingError::InvalidAmount(msg),
            MoneyError::DivisionByZero => BillingError::InvalidAmount("division by zero".into()),
        }
    }
}

impl From<TemporalError> for BillingError {
    fn from(err: TemporalError) -> Self {
        BillingError::InvalidRequest(err.to_string())
    }
}

impl From<CoreError> for BillingError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Money(e) => e.into(),
            CoreError::Temporal(e) => e.into(),
            CoreError::Validation(msg) => BillingError::InvalidRequest(msg),
            CoreError::Configuration(msg) => BillingError::Infrastructure(msg),
        }
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            // A concurrent insert of the same natural key loses the race the
            // same way a stale version does; the retry sees the winner's row.
            StoreError::Conflict { .. } | StoreError::Duplicate { .. } => {
                BillingError::ConcurrencyConflict(err.to_string())
            }
            StoreError::Unavailable(_) | StoreError::Serialization(_) => {
                BillingError::Infrastructure(err.to_string())
            }
        }
    }
}

impl From<PortError> for BillingError {
    fn from(err: PortError) -> Self {
        BillingError::Infrastructure(err.to_string())
    }
}

impl From<validator::ValidationErrors> for BillingError {
    fn from(err: validator::ValidationErrors) -> Self {
        BillingError::InvalidRequest(err.to_string())
    }
}
