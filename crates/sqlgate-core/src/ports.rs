//! Port traits. Implemented by sqlgate-postgres (stores, engine) and by the
//! server's change-source client; core logic depends only on these.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::*;

/// The script ledger. Entries are created by reconciliation, mutated only
/// by successful executions, and never deleted.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ScriptRecord>>;

    /// Always reads the latest stored state.
    async fn get(&self, id: i64) -> Result<Option<ScriptRecord>>;

    async fn existing_names(&self) -> Result<HashSet<String>>;

    /// Insert unless an entry with the same name exists. Returns whether a
    /// row was inserted; an existing entry is left untouched.
    async fn insert_if_absent(&self, record: &NewScriptRecord) -> Result<bool>;

    /// Record a successful run on `target`. Idempotent and monotonic: the
    /// flag only moves to true and the first timestamp is kept.
    async fn mark_executed(&self, name: &str, target: Target, at: DateTime<Utc>) -> Result<()>;
}

/// Append-only execution log. No update or delete exists.
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Append an entry and return its id.
    async fn append(&self, entry: &NewExecutionLogEntry) -> Result<i64>;

    /// Newest first, optionally restricted to one script.
    async fn history(&self, script_name: Option<&str>, limit: i64)
        -> Result<Vec<ExecutionLogEntry>>;

    /// Timestamp of the earliest successful run of `script_name` on `target`.
    async fn first_success_at(
        &self,
        script_name: &str,
        target: Target,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// Runs a script against a target database.
///
/// Never fails: connection errors, statement errors and timeouts are all
/// reported through [`ExecutionOutcome`].
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, target: Target, sql: &str) -> ExecutionOutcome;
}

/// External source of reviewed and merged change scripts.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Merged change requests, most recently updated first.
    async fn list_merged_change_requests(&self, limit: usize) -> Result<Vec<ChangeRequest>>;

    async fn list_approvers(&self, change_id: u64) -> Result<Vec<String>>;

    async fn list_changed_files(&self, change_id: u64) -> Result<Vec<ChangedFile>>;

    /// `None` when the file no longer exists.
    async fn fetch_file_content(&self, path: &str) -> Result<Option<String>>;

    /// Inbound notification check; not used by reconciliation itself.
    fn verify_incoming_signature(&self, payload: &[u8], signature: &str) -> bool;
}
