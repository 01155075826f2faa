//! GitHub REST API change source.
//!
//! Merged pull requests are the change requests; `APPROVED` reviews are the
//! approvals; file contents are read at the configured branch, so a script
//! deleted after merge comes back as `None`.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use sqlgate_core::ports::ChangeSource;
use sqlgate_core::{ChangeRequest, ChangedFile, FileStatus};

use crate::config::GitHubConfig;

type HmacSha256 = Hmac<Sha256>;

const PAGE_SIZE: usize = 100;
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
    merged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Review {
    state: String,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
    status: FileStatus,
}

pub struct GitHubChangeSource {
    client: Client,
    config: GitHubConfig,
}

impl GitHubChangeSource {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("sqlgate/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout)
            .build()
            .context("failed to build GitHub client")?;
        Ok(Self { client, config })
    }

    pub fn webhook_enabled(&self) -> bool {
        self.config.webhook_secret.is_some()
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.config.api_url, self.config.repo, path)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.config.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .request(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url}"))?;
        response
            .json()
            .await
            .with_context(|| format!("decoding response from {url}"))
    }

    /// Fetch every page of a list endpoint.
    async fn get_all<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for page in 1.. {
            let batch: Vec<T> = self
                .get_json(
                    url,
                    &[
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let done = batch.len() < PAGE_SIZE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl ChangeSource for GitHubChangeSource {
    async fn list_merged_change_requests(&self, limit: usize) -> Result<Vec<ChangeRequest>> {
        let url = self.repo_url("pulls");
        let mut merged = Vec::new();
        for page in 1.. {
            let batch: Vec<PullRequest> = self
                .get_json(
                    &url,
                    &[
                        ("state", "closed".to_string()),
                        ("sort", "updated".to_string()),
                        ("direction", "desc".to_string()),
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let last_page = batch.len() < PAGE_SIZE;
            merged.extend(batch.into_iter().filter_map(|pr| {
                pr.merged_at.map(|merged_at| ChangeRequest {
                    id: pr.number,
                    merged_at,
                    url: pr.html_url,
                })
            }));
            if last_page || merged.len() >= limit {
                break;
            }
        }
        merged.truncate(limit);
        debug!(count = merged.len(), "listed merged pull requests");
        Ok(merged)
    }

    async fn list_approvers(&self, change_id: u64) -> Result<Vec<String>> {
        let reviews: Vec<Review> = self
            .get_all(&self.repo_url(&format!("pulls/{change_id}/reviews")))
            .await?;
        Ok(approvers(reviews))
    }

    async fn list_changed_files(&self, change_id: u64) -> Result<Vec<ChangedFile>> {
        let files: Vec<PullRequestFile> = self
            .get_all(&self.repo_url(&format!("pulls/{change_id}/files")))
            .await?;
        Ok(files
            .into_iter()
            .map(|f| ChangedFile {
                path: f.filename,
                status: f.status,
            })
            .collect())
    }

    async fn fetch_file_content(&self, path: &str) -> Result<Option<String>> {
        let url = contents_url(&self.repo_url(""), path)?;
        let response = self
            .request(url.as_str())
            .header(header::ACCEPT, "application/vnd.github.raw")
            .query(&[("ref", self.config.branch.as_str())])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .error_for_status()
            .with_context(|| format!("GET {url}"))?
            .text()
            .await
            .with_context(|| format!("reading {path}"))?;
        Ok(Some(body))
    }

    fn verify_incoming_signature(&self, payload: &[u8], signature: &str) -> bool {
        match &self.config.webhook_secret {
            Some(secret) => verify_signature(secret.as_bytes(), payload, signature),
            None => false,
        }
    }
}

/// `<repo>/contents/<path>` with every path segment percent-encoded, so a
/// `#` or `?` in a filename stays part of the path.
fn contents_url(repo_url: &str, path: &str) -> Result<reqwest::Url> {
    let mut url =
        reqwest::Url::parse(repo_url).with_context(|| format!("invalid repository url {repo_url}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("repository url cannot have a path: {repo_url}"))?
        .pop_if_empty()
        .push("contents")
        .extend(path.trim_start_matches('/').split('/'));
    Ok(url)
}

/// Distinct logins of `APPROVED` reviews, in review order.
fn approvers(reviews: Vec<Review>) -> Vec<String> {
    let mut seen = HashSet::new();
    reviews
        .into_iter()
        .filter(|r| r.state.eq_ignore_ascii_case("APPROVED"))
        .filter_map(|r| r.user.map(|u| u.login))
        .filter(|login| seen.insert(login.clone()))
        .collect()
}

/// Check an `X-Hub-Signature-256` header (`sha256=<hex>`) against the raw
/// request body. The comparison is constant-time.
pub fn verify_signature(secret: &[u8], payload: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
