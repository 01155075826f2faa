//! GET /api/history?script=<name>&limit=<n>

use std::sync::Arc;

use axum::{extract::Query, Extension, Json};
use serde::Deserialize;
use sqlgate_core::{ExecutionLogEntry, PromotionService};

use crate::error::AppError;

const DEFAULT_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub script: Option<String>,
    pub limit: Option<i64>,
}

pub async fn history(
    Extension(service): Extension<Arc<PromotionService>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ExecutionLogEntry>>, AppError> {
    let entries = service
        .get_execution_history(
            query.script.as_deref().filter(|s| !s.is_empty()),
            query.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await?;
    Ok(Json(entries))
}
