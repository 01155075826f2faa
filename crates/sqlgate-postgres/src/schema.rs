//! Audit database schema.
//!
//! Idempotent: every statement is `IF NOT EXISTS`, so it runs on each start.

use sqlx::PgPool;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sql_scripts (
    id                      BIGSERIAL PRIMARY KEY,
    name                    TEXT NOT NULL UNIQUE,
    content                 TEXT NOT NULL,
    target_database         TEXT NOT NULL DEFAULT 'staging',
    origin_reference        TEXT,
    approvers               TEXT[] NOT NULL DEFAULT '{}',
    approved_at             TIMESTAMPTZ,
    author                  TEXT,
    purpose                 TEXT,
    staging_executed        BOOLEAN NOT NULL DEFAULT FALSE,
    staging_executed_at     TIMESTAMPTZ,
    production_executed     BOOLEAN NOT NULL DEFAULT FALSE,
    production_executed_at  TIMESTAMPTZ,
    direct_prod             BOOLEAN NOT NULL DEFAULT FALSE,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS sql_execution_log (
    id                BIGSERIAL PRIMARY KEY,
    script_name       TEXT NOT NULL,
    script_content    TEXT NOT NULL,
    executed_by       TEXT NOT NULL,
    target            TEXT NOT NULL,
    status            TEXT NOT NULL CHECK (status IN ('success', 'error')),
    rows_affected     BIGINT,
    result_rows       JSONB,
    error_message     TEXT,
    duration_ms       BIGINT NOT NULL,
    origin_reference  TEXT,
    approvers         TEXT[] NOT NULL DEFAULT '{}',
    executed_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_sql_execution_log_executed_at
    ON sql_execution_log (executed_at DESC);

CREATE INDEX IF NOT EXISTS idx_sql_execution_log_script_name
    ON sql_execution_log (script_name);
"#;

pub async fn initialize_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Initializing audit schema");
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
