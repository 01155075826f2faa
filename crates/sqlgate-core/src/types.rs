//! Ledger, audit and change-source record types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Targets and statuses ──────────────────────────────────────

/// Database a script runs against. The audit storage is never a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    Staging,
    Production,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(format!("unknown target database: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Why an execution attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Pool exhaustion or network failure before any statement ran.
    Connection,
    /// Syntax error, constraint violation, or any other server-side rejection.
    Statement,
    /// The configured statement timeout elapsed; the connection was abandoned.
    Timeout,
    /// The engine itself did not produce a result.
    Aborted,
}

// ── Ledger ────────────────────────────────────────────────────

/// One approved script and its promotion state.
///
/// `name` is globally unique. The execution flags only ever move from
/// false to true, and the timestamps record the first successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRecord {
    pub id: i64,
    pub name: String,
    pub content: String,
    pub target_database: Target,
    pub origin_reference: Option<String>,
    pub approvers: Vec<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub purpose: Option<String>,
    pub staging_executed: bool,
    pub staging_executed_at: Option<DateTime<Utc>>,
    pub production_executed: bool,
    pub production_executed_at: Option<DateTime<Utc>>,
    pub direct_prod: bool,
    pub created_at: DateTime<Utc>,
}

impl ScriptRecord {
    pub fn executed_on(&self, target: Target) -> bool {
        match target {
            Target::Staging => self.staging_executed,
            Target::Production => self.production_executed,
        }
    }
}

/// Ledger insert produced by reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScriptRecord {
    pub name: String,
    pub content: String,
    pub target_database: Target,
    pub origin_reference: Option<String>,
    pub approvers: Vec<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub purpose: Option<String>,
    pub direct_prod: bool,
}

// ── Execution ─────────────────────────────────────────────────

/// What the execution engine reports for one attempt. Never an error type:
/// every failure mode is encoded here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub rows_affected: Option<u64>,
    pub result_rows: Option<Vec<serde_json::Value>>,
    /// True when more rows were produced than were captured.
    #[serde(default)]
    pub truncated: bool,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub duration_ms: u64,
}

impl ExecutionOutcome {
    pub fn succeeded(
        rows_affected: Option<u64>,
        result_rows: Option<Vec<serde_json::Value>>,
        truncated: bool,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: true,
            rows_affected,
            result_rows,
            truncated,
            error: None,
            failure: None,
            duration_ms,
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            rows_affected: None,
            result_rows: None,
            truncated: false,
            error: Some(error.into()),
            failure: Some(kind),
            duration_ms,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        if self.success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        }
    }

    /// One-line message for operators.
    pub fn summary(&self) -> String {
        if !self.success {
            return self
                .error
                .clone()
                .unwrap_or_else(|| "execution failed".to_string());
        }
        match (&self.result_rows, self.rows_affected) {
            (Some(rows), _) if self.truncated => {
                format!("{} row(s) returned (truncated)", rows.len())
            }
            (Some(rows), _) => format!("{} row(s) returned", rows.len()),
            (None, Some(n)) => format!("{n} row(s) affected"),
            (None, None) => "executed".to_string(),
        }
    }
}

// ── Audit log ─────────────────────────────────────────────────

/// Audit entry as written. A snapshot of the script and its origin at
/// execution time, not a reference into the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExecutionLogEntry {
    pub script_name: String,
    pub script_content: String,
    pub executed_by: String,
    pub target: Target,
    pub status: ExecutionStatus,
    pub rows_affected: Option<i64>,
    pub result_rows: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub origin_reference: Option<String>,
    pub approvers: Vec<String>,
}

impl NewExecutionLogEntry {
    pub fn into_entry(self, id: i64, executed_at: DateTime<Utc>) -> ExecutionLogEntry {
        ExecutionLogEntry {
            id,
            executed_at,
            script_name: self.script_name,
            script_content: self.script_content,
            executed_by: self.executed_by,
            target: self.target,
            status: self.status,
            rows_affected: self.rows_affected,
            result_rows: self.result_rows,
            error_message: self.error_message,
            duration_ms: self.duration_ms,
            origin_reference: self.origin_reference,
            approvers: self.approvers,
        }
    }
}

/// Audit entry as read back. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: i64,
    pub executed_at: DateTime<Utc>,
    pub script_name: String,
    pub script_content: String,
    pub executed_by: String,
    pub target: Target,
    pub status: ExecutionStatus,
    pub rows_affected: Option<i64>,
    pub result_rows: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub origin_reference: Option<String>,
    pub approvers: Vec<String>,
}

// ── Change source ─────────────────────────────────────────────

/// A merged, externally reviewed change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: u64,
    pub merged_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Renamed,
    Removed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: FileStatus,
}

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub errors: usize,
}
