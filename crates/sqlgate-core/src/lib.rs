//! sqlgate-core — staging-first promotion of reviewed SQL change scripts.
//!
//! Pure domain logic: statement analysis and transaction planning, the
//! promotion gate, audit recording, change-source reconciliation, and the
//! service entry points. Persistence, the execution engine and the change
//! source are reached only through the traits in [`ports`].

pub mod analysis;
pub mod audit;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod planner;
pub mod ports;
pub mod promotion;
pub mod reconcile;
pub mod service;
pub mod types;

pub use analysis::{analyze, split_statements, strip_comments, StatementAnalysis};
pub use error::ServiceError;
pub use planner::{needs_transaction, plan, ExecutionPlan, PlannedStatement};
pub use promotion::{can_execute_on_production, PromotionRejection, PromotionState};
pub use reconcile::{ChangeSourceReconciler, ReconcileConfig};
pub use service::{ExecutionReport, LedgerEntryView, PromotionService};
pub use types::*;
