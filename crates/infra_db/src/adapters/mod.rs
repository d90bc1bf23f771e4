//! Domain Adapters
//!
//! PostgreSQL implementations of the ledger's ports.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use infra_db::adapters::{PostgresLedgerStore, PostgresSequenceGenerator};
//!
//! let store = Arc::new(PostgresLedgerStore::new(pool.clone()));
//! let sequences = Arc::new(PostgresSequenceGenerator::new(pool));
//! let service = LedgerService::new(store, clock, sequences, config);
//! ```

pub mod ledger;
pub mod sequences;

pub use ledger::PostgresLedgerStore;
pub use sequences::PostgresSequenceGenerator;
