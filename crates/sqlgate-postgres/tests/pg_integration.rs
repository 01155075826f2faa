//! Postgres integration tests for the stores and the execution engine.
//!
//! Requires a running PostgreSQL database.
//! Run with: TEST_DATABASE_URL="postgresql:///sqlgate_test" cargo test -p sqlgate-postgres -- --ignored

use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use sqlgate_core::ports::{ExecutionLogStore, LedgerStore, ScriptExecutor};
use sqlgate_core::*;
use sqlgate_postgres::{
    initialize_schema, ExecutionConfig, PgExecutionLogStore, PgLedgerStore, PgScriptExecutor,
    TargetPools,
};

// =========================================================================
// TEST INFRASTRUCTURE
// =========================================================================

struct TestDb {
    pool: PgPool,
    prefix: String,
}

impl TestDb {
    async fn new() -> Result<Self> {
        let url = std::env::var("TEST_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or_else(|_| "postgresql:///sqlgate_test".into());

        let pool = PgPool::connect(&url).await?;
        initialize_schema(&pool).await?;
        let prefix = format!("test_{}", &Uuid::new_v4().simple().to_string()[..8]);
        Ok(Self { pool, prefix })
    }

    fn name(&self, base: &str) -> String {
        format!("{}_{}", self.prefix, base)
    }

    /// Same pool for every role; the tests never rely on separation.
    fn executor(&self, statement_timeout: Duration) -> PgScriptExecutor {
        PgScriptExecutor::new(
            TargetPools {
                staging: self.pool.clone(),
                production: self.pool.clone(),
                audit: self.pool.clone(),
            },
            ExecutionConfig {
                statement_timeout,
                max_result_rows: 3,
            },
        )
    }

    async fn cleanup(&self) -> Result<()> {
        let pattern = format!("{}%", self.prefix);
        sqlx::query("DELETE FROM sql_execution_log WHERE script_name LIKE $1")
            .bind(&pattern)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM sql_scripts WHERE name LIKE $1")
            .bind(&pattern)
            .execute(&self.pool)
            .await?;
        sqlx::raw_sql(&format!(
            "DROP TABLE IF EXISTS {p}_items; DROP TABLE IF EXISTS {p}_copy",
            p = self.prefix
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_items_table(&self) -> Result<String> {
        let table = format!("{}_items", self.prefix);
        sqlx::raw_sql(&format!(
            "CREATE TABLE {table} (id INT PRIMARY KEY, label TEXT NOT NULL)"
        ))
        .execute(&self.pool)
        .await?;
        Ok(table)
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

fn new_record(name: String) -> NewScriptRecord {
    NewScriptRecord {
        name,
        content: "SELECT 1;".into(),
        target_database: Target::Staging,
        origin_reference: Some("https://forge.test/pr/1".into()),
        approvers: vec!["zed".into(), "amy".into(), "zed".into()],
        approved_at: Some(Utc::now()),
        author: Some("amy".into()),
        purpose: None,
        direct_prod: false,
    }
}

// =========================================================================
// ENGINE TESTS
// =========================================================================

#[tokio::test]
#[ignore] // Requires database
async fn failed_statement_rolls_back_whole_script() -> Result<()> {
    let db = TestDb::new().await?;
    let table = db.create_items_table().await?;
    let executor = db.executor(Duration::from_secs(30));

    let script = format!(
        "INSERT INTO {table} VALUES (1, 'a');\n\
         INSERT INTO {table} VALUES (2, 'b');\n\
         INSERT INTO {table} VALUES (1, 'duplicate');"
    );
    let outcome = executor.execute(Target::Staging, &script).await;

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::Statement));
    assert!(outcome.error.as_deref().unwrap_or("").contains("duplicate key"));
    assert_eq!(db.count(&table).await?, 0, "no partial effects may persist");

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn wrapped_script_commits_and_sums_counts() -> Result<()> {
    let db = TestDb::new().await?;
    let table = db.create_items_table().await?;
    let executor = db.executor(Duration::from_secs(30));

    let script = format!(
        "INSERT INTO {table} VALUES (1, 'a'), (2, 'b');\nUPDATE {table} SET label = 'z' WHERE id = 2;"
    );
    let outcome = executor.execute(Target::Staging, &script).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows_affected, Some(3));
    assert_eq!(db.count(&table).await?, 2);

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn returning_rows_are_captured_and_truncated() -> Result<()> {
    let db = TestDb::new().await?;
    let table = db.create_items_table().await?;
    let executor = db.executor(Duration::from_secs(30));

    let script = format!(
        "INSERT INTO {table} SELECT g, 'x' || g FROM generate_series(1, 5) g RETURNING id, label;"
    );
    let outcome = executor.execute(Target::Staging, &script).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows_affected, Some(5));
    let rows = outcome.result_rows.expect("rows captured");
    assert_eq!(rows.len(), 3);
    assert!(outcome.truncated);
    assert!(rows[0]["label"].as_str().unwrap_or("").starts_with('x'));
    assert_eq!(db.count(&table).await?, 5, "capture limit must not limit the write");

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn self_wrapped_script_runs_as_is() -> Result<()> {
    let db = TestDb::new().await?;
    let table = db.create_items_table().await?;
    let executor = db.executor(Duration::from_secs(30));

    let ok = format!("BEGIN;\nINSERT INTO {table} VALUES (1, 'a');\nCOMMIT;");
    assert!(executor.execute(Target::Staging, &ok).await.success);

    let failing = format!(
        "BEGIN;\nINSERT INTO {table} VALUES (2, 'b');\nINSERT INTO {table} VALUES (1, 'dup');\nCOMMIT;"
    );
    let outcome = executor.execute(Target::Staging, &failing).await;
    assert!(!outcome.success);
    assert_eq!(db.count(&table).await?, 1);

    // The connection went back to the pool clean.
    let after = executor.execute(Target::Staging, "SELECT 1 AS one;").await;
    assert!(after.success, "{:?}", after.error);

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn returning_inside_a_literal_runs_as_plain_update() -> Result<()> {
    let db = TestDb::new().await?;
    let table = db.create_items_table().await?;
    sqlx::raw_sql(&format!("INSERT INTO {table} VALUES (1, 'a'), (2, 'b')"))
        .execute(&db.pool)
        .await?;
    let executor = db.executor(Duration::from_secs(30));

    let script = format!("UPDATE {table} SET label = 'returning' WHERE id = 1;");
    let outcome = executor.execute(Target::Staging, &script).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows_affected, Some(1));
    assert!(outcome.result_rows.is_none());

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn select_into_creates_table_without_capture() -> Result<()> {
    let db = TestDb::new().await?;
    let table = db.create_items_table().await?;
    sqlx::raw_sql(&format!("INSERT INTO {table} VALUES (1, 'a'), (2, 'b')"))
        .execute(&db.pool)
        .await?;
    let executor = db.executor(Duration::from_secs(30));

    let copy = db.name("copy");
    let script = format!("SELECT * INTO {copy} FROM {table};");
    let outcome = executor.execute(Target::Staging, &script).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows_affected, Some(2));
    assert!(outcome.result_rows.is_none());
    assert_eq!(db.count(&copy).await?, 2);

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn self_wrapped_returning_rows_are_captured() -> Result<()> {
    let db = TestDb::new().await?;
    let table = db.create_items_table().await?;
    sqlx::raw_sql(&format!("INSERT INTO {table} VALUES (1, 'a'), (2, 'b'), (3, 'c')"))
        .execute(&db.pool)
        .await?;
    let executor = db.executor(Duration::from_secs(30));

    let script = format!(
        "BEGIN;\nUPDATE {table} SET label = 'z' WHERE id < 3 RETURNING id, label;\nCOMMIT;"
    );
    let outcome = executor.execute(Target::Staging, &script).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.rows_affected, Some(2));
    let rows = outcome.result_rows.expect("rows captured");
    assert_eq!(rows.len(), 2);
    assert!(!outcome.truncated);
    assert!(rows.iter().all(|r| r["label"] == "z"));
    assert!(rows.iter().any(|r| r["id"] == 1));

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn unterminated_read_batch_captures_last_result() -> Result<()> {
    let db = TestDb::new().await?;
    let executor = db.executor(Duration::from_secs(30));

    let outcome = executor
        .execute(Target::Staging, "SELECT 1 AS a; SELECT true AS flag, 'x' AS label")
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    let rows = outcome.result_rows.expect("rows captured");
    assert_eq!(rows, vec![serde_json::json!({"flag": true, "label": "x"})]);

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn statement_timeout_abandons_the_run() -> Result<()> {
    let db = TestDb::new().await?;
    let executor = db.executor(Duration::from_millis(200));

    let outcome = executor
        .execute(Target::Staging, "SELECT pg_sleep(5);")
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::Timeout));

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn empty_script_is_a_statement_failure() -> Result<()> {
    let db = TestDb::new().await?;
    let executor = db.executor(Duration::from_secs(30));
    let outcome = executor
        .execute(Target::Staging, "-- nothing here\n/* or here */")
        .await;
    assert_eq!(outcome.failure, Some(FailureKind::Statement));
    db.cleanup().await
}

// =========================================================================
// STORE TESTS
// =========================================================================

#[tokio::test]
#[ignore] // Requires database
async fn ledger_insert_is_idempotent_and_flags_are_monotonic() -> Result<()> {
    let db = TestDb::new().await?;
    let ledger = PgLedgerStore::new(db.pool.clone());
    let name = db.name("001.sql");

    assert!(ledger.insert_if_absent(&new_record(name.clone())).await?);
    assert!(!ledger.insert_if_absent(&new_record(name.clone())).await?);
    assert!(ledger.existing_names().await?.contains(&name));

    let first = Utc::now() - ChronoDuration::hours(1);
    ledger.mark_executed(&name, Target::Staging, first).await?;
    ledger.mark_executed(&name, Target::Staging, Utc::now()).await?;

    let record = ledger
        .list()
        .await?
        .into_iter()
        .find(|r| r.name == name)
        .expect("inserted");
    assert_eq!(record.approvers, vec!["amy", "zed"]);
    assert!(record.staging_executed);
    assert!(!record.production_executed);
    let kept = record.staging_executed_at.expect("timestamp set");
    assert!((kept - first).num_milliseconds().abs() < 5);

    let fetched = ledger.get(record.id).await?.expect("by id");
    assert_eq!(fetched.name, name);

    assert!(ledger
        .mark_executed(&db.name("missing.sql"), Target::Staging, Utc::now())
        .await
        .is_err());

    db.cleanup().await
}

#[tokio::test]
#[ignore] // Requires database
async fn execution_log_round_trip() -> Result<()> {
    let db = TestDb::new().await?;
    let log = PgExecutionLogStore::new(db.pool.clone());
    let name = db.name("002.sql");

    for status in [ExecutionStatus::Error, ExecutionStatus::Success] {
        log.append(&NewExecutionLogEntry {
            script_name: name.clone(),
            script_content: "UPDATE t SET x = 1;".into(),
            executed_by: "ops".into(),
            target: Target::Production,
            status,
            rows_affected: (status == ExecutionStatus::Success).then_some(4),
            result_rows: None,
            error_message: None,
            duration_ms: 12,
            origin_reference: None,
            approvers: vec!["amy".into()],
        })
        .await?;
    }

    let history = log.history(Some(&name), 10).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, ExecutionStatus::Success);
    assert_eq!(history[0].rows_affected, Some(4));
    assert_eq!(history[1].status, ExecutionStatus::Error);

    assert!(log
        .first_success_at(&name, Target::Production)
        .await?
        .is_some());
    assert!(log.first_success_at(&name, Target::Staging).await?.is_none());

    db.cleanup().await
}
