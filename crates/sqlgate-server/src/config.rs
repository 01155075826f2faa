//! Server configuration, read from `SQLGATE_*` environment variables.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use sqlgate_core::ReconcileConfig;
use sqlgate_postgres::{DatabaseConfig, ExecutionConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub staging: DatabaseConfig,
    pub production: DatabaseConfig,
    pub audit: DatabaseConfig,
    pub execution: ExecutionConfig,
    pub github: GitHubConfig,
    pub reconcile: ReconcileConfig,
    /// Periodic reconciliation; `None` leaves it to the webhook and manual runs.
    pub sync_interval: Option<Duration>,
}

#[derive(Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: String,
    /// `owner/name`.
    pub repo: String,
    pub branch: String,
    /// Webhook endpoint is disabled when unset.
    pub webhook_secret: Option<String>,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_url", &self.api_url)
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("webhook_enabled", &self.webhook_secret.is_some())
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            var(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("{key} must be set"))
        };

        let pool_size: u32 = parse_or(&var, "SQLGATE_POOL_SIZE", 10)?;
        let acquire_timeout = Duration::from_secs(parse_or(&var, "SQLGATE_ACQUIRE_TIMEOUT_SECS", 30)?);
        let database = |key: &str| -> Result<DatabaseConfig> {
            let mut config = DatabaseConfig::new(required(key)?);
            config.max_connections = pool_size;
            config.acquire_timeout = acquire_timeout;
            Ok(config)
        };

        let repo = required("SQLGATE_GITHUB_REPO")?;
        if repo.split('/').filter(|part| !part.is_empty()).count() != 2 {
            bail!("SQLGATE_GITHUB_REPO must be owner/name, got {repo:?}");
        }

        let item_timeout = Duration::from_secs(parse_or(&var, "SQLGATE_SYNC_ITEM_TIMEOUT_SECS", 20)?);
        let defaults = ReconcileConfig::default();
        let reconcile = ReconcileConfig {
            min_approvals: parse_or(&var, "SQLGATE_MIN_APPROVALS", defaults.min_approvals)?,
            window: parse_or(&var, "SQLGATE_SYNC_WINDOW", defaults.window)?,
            extension: var("SQLGATE_SCRIPT_EXTENSION").unwrap_or(defaults.extension),
            path_prefix: var("SQLGATE_SCRIPT_PATH").filter(|p| !p.trim().is_empty()),
            metadata_scan_lines: parse_or(
                &var,
                "SQLGATE_METADATA_SCAN_LINES",
                defaults.metadata_scan_lines,
            )?,
            item_timeout,
        };

        let sync_interval_secs: u64 = parse_or(&var, "SQLGATE_SYNC_INTERVAL_SECS", 0)?;

        Ok(Self {
            bind_addr: var("SQLGATE_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:4200".into()),
            staging: database("SQLGATE_STAGING_DATABASE_URL")?,
            production: database("SQLGATE_PRODUCTION_DATABASE_URL")?,
            audit: database("SQLGATE_AUDIT_DATABASE_URL")?,
            execution: ExecutionConfig {
                statement_timeout: Duration::from_secs(parse_or(
                    &var,
                    "SQLGATE_STATEMENT_TIMEOUT_SECS",
                    300,
                )?),
                max_result_rows: parse_or(&var, "SQLGATE_MAX_RESULT_ROWS", 500)?,
            },
            github: GitHubConfig {
                api_url: var("SQLGATE_GITHUB_API_URL")
                    .unwrap_or_else(|| "https://api.github.com".into())
                    .trim_end_matches('/')
                    .to_string(),
                token: required("SQLGATE_GITHUB_TOKEN")?,
                repo,
                branch: var("SQLGATE_GITHUB_BRANCH").unwrap_or_else(|| "main".into()),
                webhook_secret: var("SQLGATE_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
                request_timeout: item_timeout,
            },
            reconcile,
            sync_interval: (sync_interval_secs > 0).then(|| Duration::from_secs(sync_interval_secs)),
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        _ => Ok(default),
    }
}
