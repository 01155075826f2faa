//! Append-only execution log (`sql_execution_log`).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use sqlgate_core::ports::ExecutionLogStore;
use sqlgate_core::types::*;

use crate::sqlx_types::PgExecutionLogRow;

pub struct PgExecutionLogStore {
    pool: PgPool,
}

impl PgExecutionLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogStore for PgExecutionLogStore {
    async fn append(&self, entry: &NewExecutionLogEntry) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sql_execution_log
                (script_name, script_content, executed_by, target, status,
                 rows_affected, result_rows, error_message, duration_ms,
                 origin_reference, approvers)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(&entry.script_name)
        .bind(&entry.script_content)
        .bind(&entry.executed_by)
        .bind(entry.target.as_str())
        .bind(entry.status.as_str())
        .bind(entry.rows_affected)
        .bind(&entry.result_rows)
        .bind(&entry.error_message)
        .bind(entry.duration_ms)
        .bind(&entry.origin_reference)
        .bind(&entry.approvers)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn history(
        &self,
        script_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query_as::<_, PgExecutionLogRow>(
            r#"
            SELECT id, script_name, script_content, executed_by, target, status,
                   rows_affected, result_rows, error_message, duration_ms,
                   origin_reference, approvers, executed_at
            FROM sql_execution_log
            WHERE $1::text IS NULL OR script_name = $1
            ORDER BY executed_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(script_name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ExecutionLogEntry::try_from).collect()
    }

    async fn first_success_at(
        &self,
        script_name: &str,
        target: Target,
    ) -> Result<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT min(executed_at)
            FROM sql_execution_log
            WHERE script_name = $1 AND target = $2 AND status = 'success'
            "#,
        )
        .bind(script_name)
        .bind(target.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(at)
    }
}
