//! Audit recording
//!
//! Every execution attempt is written to the log exactly once, whether it
//! succeeded or not. A failed write is logged and swallowed: losing an audit
//! row degrades observability, it never fails the request that triggered it.

use std::sync::Arc;

use tracing::{debug, error};

use crate::ports::ExecutionLogStore;
use crate::types::{ExecutionOutcome, NewExecutionLogEntry, ScriptRecord, Target};

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn ExecutionLogStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn ExecutionLogStore>) -> Self {
        Self { store }
    }

    /// Append `entry`. Returns false if the write failed.
    pub async fn record(&self, entry: &NewExecutionLogEntry) -> bool {
        match self.store.append(entry).await {
            Ok(id) => {
                debug!(
                    log_id = id,
                    script = %entry.script_name,
                    target = %entry.target,
                    status = entry.status.as_str(),
                    "execution recorded"
                );
                true
            }
            Err(e) => {
                error!(
                    script = %entry.script_name,
                    target = %entry.target,
                    error = %e,
                    "failed to record execution log entry"
                );
                false
            }
        }
    }
}

/// Snapshot the script and its origin at execution time.
pub fn entry_for(
    record: &ScriptRecord,
    target: Target,
    executed_by: &str,
    outcome: &ExecutionOutcome,
) -> NewExecutionLogEntry {
    NewExecutionLogEntry {
        script_name: record.name.clone(),
        script_content: record.content.clone(),
        executed_by: executed_by.to_string(),
        target,
        status: outcome.status(),
        rows_affected: outcome
            .rows_affected
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX)),
        result_rows: outcome
            .result_rows
            .as_ref()
            .map(|rows| serde_json::Value::Array(rows.clone())),
        error_message: outcome.error.clone(),
        duration_ms: i64::try_from(outcome.duration_ms).unwrap_or(i64::MAX),
        origin_reference: record.origin_reference.clone(),
        approvers: record.approvers.clone(),
    }
}
