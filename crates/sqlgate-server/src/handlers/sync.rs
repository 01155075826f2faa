//! Operator-triggered maintenance.
//!
//! POST /api/sync               — one reconciliation pass
//! POST /api/promotion/repair   — re-apply lost promotion updates

use std::sync::Arc;

use axum::{Extension, Json};
use sqlgate_core::{PromotionService, SyncReport};

use crate::auth::Operator;
use crate::error::AppError;

pub async fn sync(
    Extension(service): Extension<Arc<PromotionService>>,
    Extension(operator): Extension<Operator>,
) -> Result<Json<SyncReport>, AppError> {
    tracing::info!(operator = operator.as_str(), "manual reconciliation requested");
    Ok(Json(service.run_reconciliation().await?))
}

pub async fn repair(
    Extension(service): Extension<Arc<PromotionService>>,
    Extension(operator): Extension<Operator>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(operator = operator.as_str(), "promotion state repair requested");
    let repaired = service.repair_promotion_state().await?;
    Ok(Json(serde_json::json!({ "repaired": repaired })))
}
