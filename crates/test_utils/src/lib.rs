//! Test Utilities Crate
//!
//! Shared test infrastructure for the tuition ledger test suite.
//!
//! # Modules
//!
//! - `fixtures`: Fixed amounts, dates, profiles and catalog requests
//! - `builders`: Request builders and the in-memory [`LedgerHarness`]
//! - `database`: PostgreSQL test containers for the SQL store
//! - `assertions`: Balance and command-result assertions
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
