//! Periodic reconciliation, for deployments that cannot receive webhooks.

use std::sync::Arc;
use std::time::Duration;

use sqlgate_core::PromotionService;

pub struct PeriodicSync {
    service: Arc<PromotionService>,
    interval: Duration,
}

impl PeriodicSync {
    pub fn new(service: Arc<PromotionService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run forever. Spawn it as a background task via `tokio::spawn`.
    pub async fn run(&self) {
        tracing::info!("PeriodicSync started (interval={:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.service.run_reconciliation().await {
                Ok(report) => tracing::debug!(
                    "Periodic sync: synced={} skipped={} errors={}",
                    report.synced,
                    report.skipped,
                    report.errors
                ),
                Err(e) => tracing::error!("Periodic sync failed: {e}"),
            }
        }
    }
}
