//! Row types decoded straight from the audit tables.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlgate_core::{ExecutionLogEntry, ScriptRecord};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgScriptRow {
    pub id: i64,
    pub name: String,
    pub content: String,
    pub target_database: String,
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

impl TryFrom<PgScriptRow> for ScriptRecord {
    type Error = anyhow::Error;

    fn try_from(row: PgScriptRow) -> Result<Self> {
        Ok(ScriptRecord {
            id: row.id,
            target_database: row
                .target_database
                .parse()
                .map_err(|e| anyhow!("script {}: {e}", row.name))?,
            name: row.name,
            content: row.content,
            origin_reference: row.origin_reference,
            approvers: row.approvers,
            approved_at: row.approved_at,
            author: row.author,
            purpose: row.purpose,
            staging_executed: row.staging_executed,
            staging_executed_at: row.staging_executed_at,
            production_executed: row.production_executed,
            production_executed_at: row.production_executed_at,
            direct_prod: row.direct_prod,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgExecutionLogRow {
    pub id: i64,
    pub script_name: String,
    pub script_content: String,
    pub executed_by: String,
    pub target: String,
    pub status: String,
    pub rows_affected: Option<i64>,
    pub result_rows: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub origin_reference: Option<String>,
    pub approvers: Vec<String>,
    pub executed_at: DateTime<Utc>,
}

impl TryFrom<PgExecutionLogRow> for ExecutionLogEntry {
    type Error = anyhow::Error;

    fn try_from(row: PgExecutionLogRow) -> Result<Self> {
        Ok(ExecutionLogEntry {
            id: row.id,
            target: row
                .target
                .parse()
                .map_err(|e| anyhow!("log entry {}: {e}", row.id))?,
            status: row
                .status
                .parse()
                .map_err(|e| anyhow!("log entry {}: {e}", row.id))?,
            script_name: row.script_name,
            script_content: row.script_content,
            executed_by: row.executed_by,
            rows_affected: row.rows_affected,
            result_rows: row.result_rows,
            error_message: row.error_message,
            duration_ms: row.duration_ms,
            origin_reference: row.origin_reference,
            approvers: row.approvers,
            executed_at: row.executed_at,
        })
    }
}
