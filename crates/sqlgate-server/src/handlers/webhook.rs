//! POST /webhooks/change-source
//!
//! Verifies `X-Hub-Signature-256` against the raw body, then starts a
//! reconciliation pass in the background for merged pull-request events.
//! Any verified delivery gets 202; the pass itself is not awaited.

use std::sync::Arc;

use axum::{body::Bytes, http::HeaderMap, http::StatusCode, Extension, Json};
use serde::Deserialize;
use sqlgate_core::PromotionService;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::router::WebhookSettings;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    pull_request: PullRequestState,
}

#[derive(Debug, Deserialize)]
struct PullRequestState {
    #[serde(default)]
    merged: bool,
}

pub async fn change_source(
    Extension(service): Extension<Arc<PromotionService>>,
    Extension(settings): Extension<WebhookSettings>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if !settings.enabled {
        return Err(AppError::Disabled);
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;
    if !service
        .reconciler()
        .source()
        .verify_incoming_signature(&body, signature)
    {
        return Err(AppError::InvalidSignature);
    }

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let triggered = event == "pull_request" && is_merge(&body);

    if triggered {
        info!("merged pull request notification, starting reconciliation");
        tokio::spawn(async move {
            match service.run_reconciliation().await {
                Ok(report) => info!(
                    synced = report.synced,
                    skipped = report.skipped,
                    errors = report.errors,
                    "webhook reconciliation finished"
                ),
                Err(e) => error!(error = %e, "webhook reconciliation failed"),
            }
        });
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "triggered": triggered })),
    ))
}

/// A payload that does not decode is not a merge.
fn is_merge(body: &[u8]) -> bool {
    match serde_json::from_slice::<PullRequestEvent>(body) {
        Ok(event) => event.action == "closed" && event.pull_request.merged,
        Err(e) => {
            warn!(error = %e, "ignoring undecodable pull_request payload");
            false
        }
    }
}
