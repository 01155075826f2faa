//! sqlgate-postgres — PostgreSQL adapters for the sqlgate-core ports.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so the
//! crate builds without a live database.

pub mod engine;
pub mod ledger;
pub mod log;
pub mod pool;
pub mod schema;
mod sqlx_types;

pub use engine::{ExecutionConfig, PgScriptExecutor};
pub use ledger::PgLedgerStore;
pub use log::PgExecutionLogStore;
pub use pool::{connect, mask_database_url, DatabaseConfig, TargetPools};
pub use schema::initialize_schema;
