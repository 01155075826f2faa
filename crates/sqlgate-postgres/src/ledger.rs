//! Postgres-backed script ledger (`sql_scripts`).

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use sqlgate_core::ports::LedgerStore;
use sqlgate_core::types::*;

use crate::sqlx_types::PgScriptRow;

const SCRIPT_COLUMNS: &str = r#"
    id, name, content, target_database, origin_reference, approvers,
    approved_at, author, purpose,
    staging_executed, staging_executed_at,
    production_executed, production_executed_at,
    direct_prod, created_at
"#;

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn list(&self) -> Result<Vec<ScriptRecord>> {
        let rows = sqlx::query_as::<_, PgScriptRow>(&format!(
            "SELECT {SCRIPT_COLUMNS} FROM sql_scripts ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ScriptRecord::try_from).collect()
    }

    async fn get(&self, id: i64) -> Result<Option<ScriptRecord>> {
        let row = sqlx::query_as::<_, PgScriptRow>(&format!(
            "SELECT {SCRIPT_COLUMNS} FROM sql_scripts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ScriptRecord::try_from).transpose()
    }

    async fn existing_names(&self) -> Result<HashSet<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM sql_scripts")
            .fetch_all(&self.pool)
            .await?;
        Ok(names.into_iter().collect())
    }

    async fn insert_if_absent(&self, record: &NewScriptRecord) -> Result<bool> {
        let mut approvers = record.approvers.clone();
        approvers.sort();
        approvers.dedup();

        let result = sqlx::query(
            r#"
            INSERT INTO sql_scripts
                (name, content, target_database, origin_reference, approvers,
                 approved_at, author, purpose, direct_prod)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&record.name)
        .bind(&record.content)
        .bind(record.target_database.as_str())
        .bind(&record.origin_reference)
        .bind(&approvers)
        .bind(record.approved_at)
        .bind(&record.author)
        .bind(&record.purpose)
        .bind(record.direct_prod)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_executed(&self, name: &str, target: Target, at: DateTime<Utc>) -> Result<()> {
        let sql = match target {
            Target::Staging => {
                r#"
                UPDATE sql_scripts
                SET staging_executed = TRUE,
                    staging_executed_at = COALESCE(staging_executed_at, $2)
                WHERE name = $1
                "#
            }
            Target::Production => {
                r#"
                UPDATE sql_scripts
                SET production_executed = TRUE,
                    production_executed_at = COALESCE(production_executed_at, $2)
                WHERE name = $1
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(name)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("no ledger entry named {name}");
        }
        Ok(())
    }
}
