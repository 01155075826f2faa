//! Connection pools for the staging, production and audit databases.

use std::time::Duration;

use sqlgate_core::Target;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

/// Pool configuration shared by every database sqlgate talks to.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("database_url", &mask_database_url(&self.database_url))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)), // 10 minutes
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }
}

pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        "Connecting to database: {}",
        mask_database_url(&config.database_url)
    );

    let mut pool_options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout);

    if let Some(idle_timeout) = config.idle_timeout {
        pool_options = pool_options.idle_timeout(idle_timeout);
    }

    if let Some(max_lifetime) = config.max_lifetime {
        pool_options = pool_options.max_lifetime(max_lifetime);
    }

    pool_options
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            warn!(
                "Failed to connect to {}: {}",
                mask_database_url(&config.database_url),
                e
            );
            e
        })
}

/// One pool per execution target plus the audit database that holds the
/// ledger and the execution log.
#[derive(Debug, Clone)]
pub struct TargetPools {
    pub staging: PgPool,
    pub production: PgPool,
    pub audit: PgPool,
}

impl TargetPools {
    pub async fn connect(
        staging: &DatabaseConfig,
        production: &DatabaseConfig,
        audit: &DatabaseConfig,
    ) -> Result<Self, sqlx::Error> {
        Ok(Self {
            staging: connect(staging).await?,
            production: connect(production).await?,
            audit: connect(audit).await?,
        })
    }

    pub fn for_target(&self, target: Target) -> &PgPool {
        match target {
            Target::Staging => &self.staging,
            Target::Production => &self.production,
        }
    }

    pub async fn close(&self) {
        info!("Closing database connection pools");
        self.staging.close().await;
        self.production.close().await;
        self.audit.close().await;
    }
}

/// Mask the password in a database URL for logging.
pub fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else {
        let chars: Vec<char> = url.chars().collect();
        if chars.len() > 20 {
            let head: String = chars[..10].iter().collect();
            let tail: String = chars[chars.len() - 10..].iter().collect();
            format!("{head}***{tail}")
        } else {
            "***".to_string()
        }
    }
}
