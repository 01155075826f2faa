//! Ledger handlers.
//!
//! GET  /api/scripts              — ledger, newest first
//! GET  /api/scripts/:id          — one entry with its promotion state
//! POST /api/scripts/:id/execute  — run against `staging` or `production`

use std::sync::Arc;

use axum::{extract::Path, Extension, Json};
use serde::Deserialize;
use sqlgate_core::{ExecutionReport, LedgerEntryView, PromotionService, Target};

use crate::auth::Operator;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub target: String,
}

pub async fn list_scripts(
    Extension(service): Extension<Arc<PromotionService>>,
) -> Result<Json<Vec<LedgerEntryView>>, AppError> {
    Ok(Json(service.list_ledger().await?))
}

pub async fn get_script(
    Extension(service): Extension<Arc<PromotionService>>,
    Path(id): Path<i64>,
) -> Result<Json<LedgerEntryView>, AppError> {
    Ok(Json(service.get_ledger_entry(id).await?))
}

/// A failed run is still a 200: the body carries `success: false` and the
/// attempt is in the audit log. Only a gate rejection is an HTTP error.
pub async fn execute_script(
    Extension(service): Extension<Arc<PromotionService>>,
    Extension(operator): Extension<Operator>,
    Path(id): Path<i64>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<ExecutionReport>, AppError> {
    let target: Target = body.target.parse().map_err(AppError::BadRequest)?;
    let report = service.execute_script(id, target, operator.as_str()).await?;
    Ok(Json(report))
}
