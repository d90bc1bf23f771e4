//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the tuition ledger, built on SQLx.
//!
//! # Storage model
//!
//! Every ledger entity lives in `ledger_records` as a JSONB body keyed by
//! `(kind, id)`, with a version column used for optimistic concurrency and a
//! handful of indexed columns (student, parent, natural key, status) for the
//! store's queries. Reference counters live in `ledger_sequences`.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresLedgerStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/tuition_ledger")).await?;
//! run_migrations(&pool).await?;
//! let store = PostgresLedgerStore::new(pool);
//! ```

pub mod adapters;
pub mod error;
pub mod pool;

pub use adapters::{PostgresLedgerStore, PostgresSequenceGenerator};
pub use error::DatabaseError;
pub use pool::{create_pool, run_migrations, DatabaseConfig, DatabasePool};
