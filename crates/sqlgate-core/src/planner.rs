//! Transaction planning
//!
//! Turns a [`StatementAnalysis`] into the shape the engine executes.
//! A single statement relies on the server's implicit atomicity and is never
//! wrapped (some statements, e.g. `CREATE INDEX CONCURRENTLY`, are illegal
//! inside a transaction block). A script that opens its own transaction is
//! never wrapped again.

use crate::analysis::{analyze, split_statements, StatementAnalysis};

/// `statement_count > 1 AND NOT is_already_wrapped`.
pub fn needs_transaction(analysis: &StatementAnalysis) -> bool {
    analysis.statement_count > 1 && !analysis.is_already_wrapped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    pub sql: String,
    pub capture_rows: bool,
}

impl PlannedStatement {
    fn new(sql: String) -> Self {
        let capture_rows = analyze(&sql).should_capture_rows;
        Self { sql, capture_rows }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Nothing executable after comments are removed.
    Empty,
    /// One statement sent on its own, outside any explicit transaction.
    Direct(PlannedStatement),
    /// Statements run in source order between BEGIN and COMMIT; the first
    /// failure rolls everything back.
    Transaction(Vec<PlannedStatement>),
    /// The script is sent to the server as one batch, unmodified. Used when
    /// the script manages its own transaction, or holds several statements
    /// without enough terminators to warrant wrapping.
    Batch {
        script: String,
        self_wrapped: bool,
        capture_rows: bool,
    },
}

impl ExecutionPlan {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Direct(_) => "direct",
            Self::Transaction(_) => "transaction",
            Self::Batch { .. } => "batch",
        }
    }
}

/// Plan the execution of `sql`.
pub fn plan(sql: &str) -> ExecutionPlan {
    let analysis = analyze(sql);
    let mut statements = split_statements(sql);

    if statements.is_empty() {
        return ExecutionPlan::Empty;
    }

    if needs_transaction(&analysis) {
        return ExecutionPlan::Transaction(
            statements.into_iter().map(PlannedStatement::new).collect(),
        );
    }

    if analysis.is_already_wrapped || statements.len() > 1 {
        return ExecutionPlan::Batch {
            script: sql.to_string(),
            self_wrapped: analysis.is_already_wrapped,
            capture_rows: analysis.should_capture_rows,
        };
    }

    ExecutionPlan::Direct(PlannedStatement::new(statements.remove(0)))
}
