//! sqlgate-server — promotes reviewed SQL change scripts from staging to
//! production.
//!
//! Configuration is read from `SQLGATE_*` environment variables (a `.env`
//! file is honoured); see `config.rs` for the full list.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlgate_core::{ChangeSourceReconciler, PromotionService};
use sqlgate_postgres::{
    initialize_schema, PgExecutionLogStore, PgLedgerStore, PgScriptExecutor, TargetPools,
};
use sqlgate_server::config::AppConfig;
use sqlgate_server::github::GitHubChangeSource;
use sqlgate_server::router::{build_router, WebhookSettings};
use sqlgate_server::scheduler::PeriodicSync;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlgate=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::debug!(?config, "loaded configuration");

    let pools = TargetPools::connect(&config.staging, &config.production, &config.audit)
        .await
        .context("failed to connect to databases")?;
    initialize_schema(&pools.audit)
        .await
        .context("failed to initialize audit schema")?;
    tracing::info!("Connected to staging, production and audit databases");

    let source = GitHubChangeSource::new(config.github.clone())?;
    let webhook = WebhookSettings {
        enabled: source.webhook_enabled(),
    };

    let ledger: Arc<dyn sqlgate_core::ports::LedgerStore> =
        Arc::new(PgLedgerStore::new(pools.audit.clone()));
    let reconciler =
        ChangeSourceReconciler::new(Arc::new(source), Arc::clone(&ledger), config.reconcile.clone());
    let service = Arc::new(PromotionService::new(
        ledger,
        Arc::new(PgExecutionLogStore::new(pools.audit.clone())),
        Arc::new(PgScriptExecutor::new(pools.clone(), config.execution.clone())),
        reconciler,
    ));

    if let Some(interval) = config.sync_interval {
        let periodic = PeriodicSync::new(Arc::clone(&service), interval);
        tokio::spawn(async move {
            periodic.run().await;
        });
    }

    let app = build_router(service, webhook);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!(
        "sqlgate-server listening on {} (webhook {})",
        config.bind_addr,
        if webhook.enabled { "enabled" } else { "disabled" }
    );

    axum::serve(listener, app).await.context("server error")?;
    pools.close().await;
    Ok(())
}
