//! Script execution engine.
//!
//! Executes an [`ExecutionPlan`] on the target's pool under a client-side
//! timeout. Every failure comes back as an [`ExecutionOutcome`]; nothing
//! here returns an error to the caller.
//!
//! Statements go to the server unmodified over the simple query protocol.
//! Rows are collected from the result stream as it is drained: at most
//! `max_result_rows` are kept, the rest are counted so truncation can be
//! reported. Only a statement that actually sends rows back produces a
//! capture.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgValueFormat};
use sqlx::{Column, Connection, Either, Executor, PgConnection, Row, TypeInfo, ValueRef};
use tracing::{debug, warn};

use sqlgate_core::ports::ScriptExecutor;
use sqlgate_core::{plan, ExecutionOutcome, ExecutionPlan, FailureKind, Target};

use crate::pool::TargetPools;

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub statement_timeout: Duration,
    pub max_result_rows: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(300),
            max_result_rows: 500,
        }
    }
}

#[derive(Debug, Default)]
struct RunResult {
    rows_affected: u64,
    rows: Option<Vec<JsonValue>>,
    truncated: bool,
}

impl RunResult {
    /// Fold one statement's result into a transaction total. Counts are
    /// summed; the last statement that captured rows wins.
    fn absorb(&mut self, next: RunResult) {
        self.rows_affected += next.rows_affected;
        if next.rows.is_some() {
            self.rows = next.rows;
            self.truncated = next.truncated;
        }
    }
}

/// Rows of the statement currently streaming back, capped at `limit`.
struct Capture {
    limit: usize,
    kept: Vec<JsonValue>,
    seen: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            kept: Vec::new(),
            seen: 0,
        }
    }

    fn push(&mut self, row: &PgRow) {
        if self.kept.len() < self.limit {
            self.kept.push(row_to_json(row));
        }
        self.seen += 1;
    }

    /// Close the current statement. Returns its rows if it sent any.
    fn finish(&mut self) -> Option<(Vec<JsonValue>, bool)> {
        let seen = std::mem::take(&mut self.seen);
        let kept = std::mem::take(&mut self.kept);
        (seen > 0).then(|| {
            let truncated = seen > kept.len();
            (kept, truncated)
        })
    }
}

pub struct PgScriptExecutor {
    pools: TargetPools,
    config: ExecutionConfig,
}

impl PgScriptExecutor {
    pub fn new(pools: TargetPools, config: ExecutionConfig) -> Self {
        Self { pools, config }
    }

    async fn run_plan(
        &self,
        conn: &mut PgConnection,
        plan: &ExecutionPlan,
    ) -> Result<RunResult, sqlx::Error> {
        match plan {
            ExecutionPlan::Empty => Ok(RunResult::default()),
            ExecutionPlan::Direct(statement) => {
                self.run_sql(conn, &statement.sql, statement.capture_rows)
                    .await
            }
            ExecutionPlan::Transaction(statements) => {
                let mut tx = conn.begin().await?;
                let mut total = RunResult::default();
                for (index, statement) in statements.iter().enumerate() {
                    match self
                        .run_sql(&mut tx, &statement.sql, statement.capture_rows)
                        .await
                    {
                        Ok(result) => total.absorb(result),
                        Err(e) => {
                            debug!(index, "statement failed, rolling back transaction");
                            if let Err(rollback) = tx.rollback().await {
                                warn!(error = %rollback, "rollback failed");
                            }
                            return Err(e);
                        }
                    }
                }
                tx.commit().await?;
                Ok(total)
            }
            ExecutionPlan::Batch {
                script,
                self_wrapped,
                capture_rows,
            } => {
                let run = self.run_sql(conn, script, *capture_rows).await;
                // The script's own BEGIN may have left the session in an
                // aborted transaction.
                if run.is_err() && *self_wrapped {
                    if let Err(rollback) =
                        Executor::execute(&mut *conn, sqlx::raw_sql("ROLLBACK")).await
                    {
                        warn!(error = %rollback, "rollback after failed batch failed");
                    }
                }
                run
            }
        }
    }

    /// Send `sql` as-is and drain every result. Affected-row counts are
    /// summed across statements; with `capture` set, the last statement that
    /// returned rows provides the capture.
    async fn run_sql(
        &self,
        conn: &mut PgConnection,
        sql: &str,
        capture: bool,
    ) -> Result<RunResult, sqlx::Error> {
        let mut result = RunResult::default();
        let mut current = Capture::new(self.config.max_result_rows);

        let mut stream = Executor::fetch_many(&mut *conn, sqlx::raw_sql(sql));
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => {
                    result.rows_affected += done.rows_affected();
                    if let Some((rows, truncated)) = current.finish() {
                        result.rows = Some(rows);
                        result.truncated = truncated;
                    }
                }
                Either::Right(row) if capture => current.push(&row),
                Either::Right(_) => {}
            }
        }
        Ok(result)
    }
}

/// Render one row as a JSON object keyed by column name.
fn row_to_json(row: &PgRow) -> JsonValue {
    let mut map = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = column_to_json(row, index, column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    JsonValue::Object(map)
}

fn column_to_json(row: &PgRow, index: usize, type_name: &str) -> JsonValue {
    let decoded = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .map(|v| v.map(JsonValue::Bool)),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .map(|v| v.map(JsonValue::from)),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .map(|v| v.map(JsonValue::from)),
        "INT8" => row
            .try_get::<Option<i64>, _>(index)
            .map(|v| v.map(JsonValue::from)),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .map(|v| v.map(JsonValue::from)),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .map(|v| v.map(JsonValue::from)),
        "JSON" | "JSONB" => row.try_get::<Option<JsonValue>, _>(index),
        _ => return text_value(row, index),
    };
    match decoded {
        Ok(value) => value.unwrap_or(JsonValue::Null),
        Err(_) => text_value(row, index),
    }
}

/// Everything else is passed through in Postgres' own text rendering.
fn text_value(row: &PgRow, index: usize) -> JsonValue {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() && raw.format() == PgValueFormat::Text => raw
            .as_str()
            .map(|s| JsonValue::String(s.to_string()))
            .unwrap_or(JsonValue::Null),
        _ => JsonValue::Null,
    }
}

#[async_trait]
impl ScriptExecutor for PgScriptExecutor {
    async fn execute(&self, target: Target, sql: &str) -> ExecutionOutcome {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let plan = plan(sql);
        if plan == ExecutionPlan::Empty {
            return ExecutionOutcome::failed(
                FailureKind::Statement,
                "script contains no executable statements",
                elapsed(),
            );
        }
        debug!(target = %target, mode = plan.describe(), "executing plan");

        let mut conn = match self.pools.for_target(target).acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(target = %target, error = %e, "could not acquire connection");
                return ExecutionOutcome::failed(
                    FailureKind::Connection,
                    format!("could not connect to {target} database: {e}"),
                    elapsed(),
                );
            }
        };

        let run = tokio::time::timeout(
            self.config.statement_timeout,
            self.run_plan(&mut conn, &plan),
        )
        .await;

        match run {
            Ok(Ok(result)) => ExecutionOutcome::succeeded(
                Some(result.rows_affected),
                result.rows,
                result.truncated,
                elapsed(),
            ),
            Ok(Err(e)) => {
                let kind = classify(&e);
                if kind == FailureKind::Connection {
                    // Don't hand a broken session back to the pool.
                    drop(conn.detach());
                }
                ExecutionOutcome::failed(kind, describe(&e), elapsed())
            }
            Err(_) => {
                // The session may still be running the statement server-side;
                // closing it is the only way to stop it from here.
                drop(conn.detach());
                warn!(
                    target = %target,
                    timeout_secs = self.config.statement_timeout.as_secs(),
                    "execution timed out, connection abandoned"
                );
                ExecutionOutcome::failed(
                    FailureKind::Timeout,
                    format!(
                        "execution exceeded {}s timeout",
                        self.config.statement_timeout.as_secs()
                    ),
                    elapsed(),
                )
            }
        }
    }
}

fn classify(e: &sqlx::Error) -> FailureKind {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => FailureKind::Connection,
        _ => FailureKind::Statement,
    }
}

/// Server errors carry their own message; strip sqlx's wrapper text.
fn describe(e: &sqlx::Error) -> String {
    match e {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) => format!("{} (SQLSTATE {code})", db.message()),
            None => db.message().to_string(),
        },
        other => other.to_string(),
    }
}
