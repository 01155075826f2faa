//! End-to-end promotion flow against in-memory ports.
//!
//! Covers the gate ordering: rejected production attempts never reach the
//! engine and leave no audit entry; every attempted execution is audited;
//! only successful runs advance the ledger.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use sqlgate_core::memory::{InMemoryExecutionLogStore, InMemoryLedgerStore};
use sqlgate_core::ports::{ChangeSource, ExecutionLogStore, LedgerStore, ScriptExecutor};
use sqlgate_core::*;

// =========================================================================
// TEST INFRASTRUCTURE
// =========================================================================

/// Engine double that records every call and replays a fixed outcome.
struct RecordingExecutor {
    calls: Mutex<Vec<(Target, String)>>,
    outcome: ExecutionOutcome,
    panic: bool,
}

impl RecordingExecutor {
    fn returning(outcome: ExecutionOutcome) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            outcome,
            panic: false,
        }
    }

    fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::returning(ExecutionOutcome::succeeded(None, None, false, 0))
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ScriptExecutor for RecordingExecutor {
    async fn execute(&self, target: Target, sql: &str) -> ExecutionOutcome {
        self.calls.lock().unwrap().push((target, sql.to_string()));
        if self.panic {
            panic!("driver bug");
        }
        self.outcome.clone()
    }
}

struct EmptySource;

#[async_trait]
impl ChangeSource for EmptySource {
    async fn list_merged_change_requests(&self, _limit: usize) -> Result<Vec<ChangeRequest>> {
        Ok(vec![])
    }
    async fn list_approvers(&self, _change_id: u64) -> Result<Vec<String>> {
        Ok(vec![])
    }
    async fn list_changed_files(&self, _change_id: u64) -> Result<Vec<ChangedFile>> {
        Ok(vec![])
    }
    async fn fetch_file_content(&self, _path: &str) -> Result<Option<String>> {
        Ok(None)
    }
    fn verify_incoming_signature(&self, _payload: &[u8], _signature: &str) -> bool {
        false
    }
}

/// Ledger whose state updates fail a configurable number of times.
struct FlakyLedger {
    inner: InMemoryLedgerStore,
    failures_left: AtomicUsize,
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    async fn list(&self) -> Result<Vec<ScriptRecord>> {
        self.inner.list().await
    }
    async fn get(&self, id: i64) -> Result<Option<ScriptRecord>> {
        self.inner.get(id).await
    }
    async fn existing_names(&self) -> Result<HashSet<String>> {
        self.inner.existing_names().await
    }
    async fn insert_if_absent(&self, record: &NewScriptRecord) -> Result<bool> {
        self.inner.insert_if_absent(record).await
    }
    async fn mark_executed(&self, name: &str, target: Target, at: DateTime<Utc>) -> Result<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("ledger write timed out"));
        }
        self.inner.mark_executed(name, target, at).await
    }
}

struct Harness {
    service: PromotionService,
    ledger: Arc<dyn LedgerStore>,
    log: Arc<InMemoryExecutionLogStore>,
    executor: Arc<RecordingExecutor>,
}

fn harness_with(ledger: Arc<dyn LedgerStore>, executor: RecordingExecutor) -> Harness {
    let log = Arc::new(InMemoryExecutionLogStore::new());
    let executor = Arc::new(executor);
    let reconciler = ChangeSourceReconciler::new(
        Arc::new(EmptySource),
        Arc::clone(&ledger),
        ReconcileConfig::default(),
    );
    let service = PromotionService::new(
        Arc::clone(&ledger),
        log.clone(),
        executor.clone(),
        reconciler,
    );
    Harness {
        service,
        ledger,
        log,
        executor,
    }
}

fn harness(executor: RecordingExecutor) -> Harness {
    harness_with(Arc::new(InMemoryLedgerStore::new()), executor)
}

fn script(name: &str, direct_prod: bool) -> NewScriptRecord {
    NewScriptRecord {
        name: name.into(),
        content: "UPDATE accounts SET active = true WHERE id = 1;".into(),
        target_database: Target::Production,
        origin_reference: Some("https://forge.test/pr/9".into()),
        approvers: vec!["ana".into(), "bo".into()],
        approved_at: Some(Utc::now()),
        author: Some("ana".into()),
        purpose: Some("reactivate".into()),
        direct_prod,
    }
}

async fn seed(h: &Harness, record: NewScriptRecord) -> i64 {
    assert!(h.ledger.insert_if_absent(&record).await.unwrap());
    h.ledger
        .list()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.name == record.name)
        .unwrap()
        .id
}

fn ok(rows: u64) -> ExecutionOutcome {
    ExecutionOutcome::succeeded(Some(rows), None, false, 4)
}

// =========================================================================
// GATE TESTS
// =========================================================================

#[tokio::test]
async fn production_rejected_before_staging() {
    let h = harness(RecordingExecutor::returning(ok(1)));
    let id = seed(&h, script("001.sql", false)).await;

    let err = h
        .service
        .execute_script(id, Target::Production, "ops")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Rejected(_)));
    assert_eq!(err.http_status(), 403);
    assert_eq!(h.executor.call_count(), 0, "rejected run must not reach the engine");
    assert!(h.log.history(None, 10).await.unwrap().is_empty());
    let entry = h.service.get_ledger_entry(id).await.unwrap();
    assert_eq!(entry.promotion_state, PromotionState::Pending);
}

#[tokio::test]
async fn staging_then_production_completes() {
    let h = harness(RecordingExecutor::returning(ok(1)));
    let id = seed(&h, script("002.sql", false)).await;

    let staging = h
        .service
        .execute_script(id, Target::Staging, "ops")
        .await
        .unwrap();
    assert!(staging.outcome.success);
    assert_eq!(staging.promotion_state, PromotionState::ReadyForProduction);
    assert!(staging.audit_recorded);

    let production = h
        .service
        .execute_script(id, Target::Production, "ops")
        .await
        .unwrap();
    assert_eq!(production.promotion_state, PromotionState::Completed);
    assert_eq!(production.message, "1 row(s) affected");

    let record = h.ledger.get(id).await.unwrap().unwrap();
    assert!(record.staging_executed && record.production_executed);
    assert_eq!(h.executor.call_count(), 2);
    assert_eq!(h.log.history(Some("002.sql"), 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn direct_prod_skips_staging() {
    let h = harness(RecordingExecutor::returning(ok(3)));
    let id = seed(&h, script("003.sql", true)).await;

    let entry = h.service.get_ledger_entry(id).await.unwrap();
    assert_eq!(entry.promotion_state, PromotionState::DirectEligible);
    assert!(entry.can_execute_on_production);

    let report = h
        .service
        .execute_script(id, Target::Production, "ops")
        .await
        .unwrap();
    assert_eq!(report.promotion_state, PromotionState::Completed);
    let record = h.ledger.get(id).await.unwrap().unwrap();
    assert!(!record.staging_executed);
    assert!(record.production_executed);
}

// =========================================================================
// FAILURE TESTS
// =========================================================================

#[tokio::test]
async fn failed_staging_run_is_audited_and_does_not_advance() {
    let failure = ExecutionOutcome::failed(
        FailureKind::Statement,
        "duplicate key value violates unique constraint \"accounts_pkey\"",
        9,
    );
    let h = harness(RecordingExecutor::returning(failure));
    let id = seed(&h, script("004.sql", false)).await;

    let report = h
        .service
        .execute_script(id, Target::Staging, "ops")
        .await
        .unwrap();
    assert!(!report.outcome.success);
    assert!(report.message.contains("duplicate key"));
    assert_eq!(report.promotion_state, PromotionState::Pending);

    let log = h.log.history(None, 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, ExecutionStatus::Error);
    assert_eq!(log[0].rows_affected, None);
    assert!(!h.ledger.get(id).await.unwrap().unwrap().staging_executed);
}

#[tokio::test]
async fn engine_panic_is_audited_as_error() {
    let h = harness(RecordingExecutor::panicking());
    let id = seed(&h, script("005.sql", false)).await;

    let report = h
        .service
        .execute_script(id, Target::Staging, "ops")
        .await
        .unwrap();
    assert!(!report.outcome.success);
    assert_eq!(report.outcome.failure, Some(FailureKind::Aborted));

    let log = h.log.history(None, 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, ExecutionStatus::Error);
}

#[tokio::test]
async fn missing_entry_is_not_found() {
    let h = harness(RecordingExecutor::returning(ok(1)));
    let err = h
        .service
        .execute_script(404, Target::Staging, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn blank_executor_identity_is_invalid() {
    let h = harness(RecordingExecutor::returning(ok(1)));
    let id = seed(&h, script("006.sql", false)).await;
    let err = h
        .service
        .execute_script(id, Target::Staging, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
    assert_eq!(h.executor.call_count(), 0);
}

#[tokio::test]
async fn lost_state_update_is_reported_and_repairable() {
    let ledger = Arc::new(FlakyLedger {
        inner: InMemoryLedgerStore::new(),
        failures_left: AtomicUsize::new(1),
    });
    let h = harness_with(ledger, RecordingExecutor::returning(ok(1)));
    let id = seed(&h, script("007.sql", false)).await;

    let report = h
        .service
        .execute_script(id, Target::Staging, "ops")
        .await
        .unwrap();
    assert!(report.outcome.success);
    assert!(report.audit_recorded);
    assert!(report.state_update_error.is_some());
    assert!(!h.ledger.get(id).await.unwrap().unwrap().staging_executed);

    assert_eq!(h.service.repair_promotion_state().await.unwrap(), 1);
    let record = h.ledger.get(id).await.unwrap().unwrap();
    assert!(record.staging_executed);
    assert!(!record.production_executed);

    assert_eq!(h.service.repair_promotion_state().await.unwrap(), 0);
}

// =========================================================================
// ENTRY POINTS
// =========================================================================

#[tokio::test]
async fn history_limit_is_clamped() {
    let h = harness(RecordingExecutor::returning(ok(1)));
    let id = seed(&h, script("008.sql", false)).await;
    for _ in 0..3 {
        h.service
            .execute_script(id, Target::Staging, "ops")
            .await
            .unwrap();
    }
    assert_eq!(h.service.get_execution_history(None, 0).await.unwrap().len(), 1);
    assert_eq!(
        h.service
            .get_execution_history(Some("008.sql"), 50)
            .await
            .unwrap()
            .len(),
        3
    );
}

#[tokio::test]
async fn reconciliation_entry_point_reports_counts() {
    let h = harness(RecordingExecutor::returning(ok(1)));
    let report = h.service.run_reconciliation().await.unwrap();
    assert_eq!(report, SyncReport::default());
}
