//! Promotion service: the entry points consumed by the HTTP layer.
//!
//! `execute_script` is the one path through which a ledger entry reaches a
//! database:
//!
//! 1. reload the entry (never authorise from a stale read)
//! 2. promotion gate, for production only; a rejection stops here
//! 3. execute
//! 4. append the audit entry
//! 5. on success, advance the promotion state
//!
//! The log is written before the state so a crash in between leaves a
//! success entry with no matching flag, which `repair_promotion_state`
//! detects and re-applies.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{entry_for, AuditRecorder};
use crate::error::ServiceError;
use crate::ports::{ExecutionLogStore, LedgerStore, ScriptExecutor};
use crate::promotion::{self, PromotionState};
use crate::reconcile::ChangeSourceReconciler;
use crate::types::*;

pub const MAX_HISTORY_LIMIT: i64 = 1000;

/// A ledger entry together with its derived promotion state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntryView {
    #[serde(flatten)]
    pub record: ScriptRecord,
    pub promotion_state: PromotionState,
    pub can_execute_on_production: bool,
}

impl From<ScriptRecord> for LedgerEntryView {
    fn from(record: ScriptRecord) -> Self {
        Self {
            promotion_state: PromotionState::of(&record),
            can_execute_on_production: promotion::can_execute_on_production(&record),
            record,
        }
    }
}

/// Result of one authorised execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub script_id: i64,
    pub script_name: String,
    pub target: Target,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
    pub message: String,
    pub audit_recorded: bool,
    pub promotion_state: PromotionState,
    /// Set when the run succeeded but the ledger could not be updated.
    pub state_update_error: Option<String>,
}

pub struct PromotionService {
    ledger: Arc<dyn LedgerStore>,
    log: Arc<dyn ExecutionLogStore>,
    executor: Arc<dyn ScriptExecutor>,
    audit: AuditRecorder,
    reconciler: ChangeSourceReconciler,
}

impl PromotionService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        log: Arc<dyn ExecutionLogStore>,
        executor: Arc<dyn ScriptExecutor>,
        reconciler: ChangeSourceReconciler,
    ) -> Self {
        Self {
            audit: AuditRecorder::new(Arc::clone(&log)),
            ledger,
            log,
            executor,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &ChangeSourceReconciler {
        &self.reconciler
    }

    pub async fn list_ledger(&self) -> Result<Vec<LedgerEntryView>, ServiceError> {
        let records = self.ledger.list().await?;
        Ok(records.into_iter().map(LedgerEntryView::from).collect())
    }

    pub async fn get_ledger_entry(&self, id: i64) -> Result<LedgerEntryView, ServiceError> {
        self.load(id).await.map(LedgerEntryView::from)
    }

    pub async fn execute_script(
        &self,
        id: i64,
        target: Target,
        executed_by: &str,
    ) -> Result<ExecutionReport, ServiceError> {
        let executed_by = executed_by.trim();
        if executed_by.is_empty() {
            return Err(ServiceError::InvalidInput(
                "executor identity is required".to_string(),
            ));
        }

        let record = self.load(id).await?;

        if let Err(rejection) = promotion::authorize(&record, target) {
            warn!(
                script = %record.name,
                target = %target,
                executed_by,
                "production execution rejected by promotion gate"
            );
            return Err(rejection.into());
        }

        info!(script = %record.name, target = %target, executed_by, "executing script");
        let outcome = self.run(target, &record.content).await;

        let audit_recorded = self
            .audit
            .record(&entry_for(&record, target, executed_by, &outcome))
            .await;

        let mut promotion_state = PromotionState::of(&record);
        let mut state_update_error = None;
        if outcome.success {
            match self
                .ledger
                .mark_executed(&record.name, target, Utc::now())
                .await
            {
                Ok(()) => {
                    let mut advanced = record.clone();
                    let transition = promotion::advance(&mut advanced, target, Utc::now());
                    if transition.changed() {
                        info!(
                            script = %record.name,
                            from = ?transition.from,
                            to = ?transition.to,
                            "promotion state advanced"
                        );
                    }
                    promotion_state = transition.to;
                }
                Err(e) => {
                    error!(
                        script = %record.name,
                        target = %target,
                        error = %e,
                        "execution succeeded but promotion state update failed"
                    );
                    state_update_error = Some(e.to_string());
                }
            }
        } else {
            warn!(
                script = %record.name,
                target = %target,
                error = outcome.error.as_deref().unwrap_or(""),
                "script execution failed"
            );
        }

        Ok(ExecutionReport {
            script_id: record.id,
            script_name: record.name,
            target,
            message: outcome.summary(),
            outcome,
            audit_recorded,
            promotion_state,
            state_update_error,
        })
    }

    pub async fn get_execution_history(
        &self,
        script_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>, ServiceError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.log.history(script_name, limit).await?)
    }

    pub async fn run_reconciliation(&self) -> Result<SyncReport, ServiceError> {
        Ok(self.reconciler.sync().await?)
    }

    /// Re-apply promotion updates for successful runs whose ledger update was
    /// lost. Returns the number of entries repaired.
    pub async fn repair_promotion_state(&self) -> Result<usize, ServiceError> {
        let mut repaired = 0;
        for record in self.ledger.list().await? {
            let mut touched = false;
            for target in [Target::Staging, Target::Production] {
                if record.executed_on(target) {
                    continue;
                }
                if let Some(at) = self.log.first_success_at(&record.name, target).await? {
                    self.ledger.mark_executed(&record.name, target, at).await?;
                    warn!(script = %record.name, target = %target, "repaired promotion state from execution log");
                    touched = true;
                }
            }
            if touched {
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    async fn load(&self, id: i64) -> Result<ScriptRecord, ServiceError> {
        self.ledger
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("ledger entry {id}")))
    }

    /// Run the engine, turning a panic into an error-classified outcome so
    /// the attempt is still audited.
    async fn run(&self, target: Target, sql: &str) -> ExecutionOutcome {
        let started = Instant::now();
        match AssertUnwindSafe(self.executor.execute(target, sql))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(target = %target, "execution engine panicked");
                ExecutionOutcome::failed(
                    FailureKind::Aborted,
                    "execution aborted before a result was produced",
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }
}
