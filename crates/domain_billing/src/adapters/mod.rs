//! Store adapters that live alongside the domain
//!
//! The PostgreSQL adapter lives in `infra_db`; the in-memory adapter here
//! backs tests and embedded use.

pub mod memory;

pub use memory::InMemoryLedgerStore;
