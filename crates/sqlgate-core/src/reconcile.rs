//! Change-source reconciliation
//!
//! Imports reviewed, merged change scripts into the ledger. A pass walks the
//! most recently updated merged change requests in the order the source
//! returns them and the files of each request in listing order.
//!
//! The ledger name is the dedup key, so re-running a pass never duplicates
//! an entry and never touches one that already exists. Expected conditions
//! (too few approvals, no eligible files, duplicate name, file deleted after
//! merge) are skips. Anything else is counted as an error for that item and
//! the pass moves on.

use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};

use crate::metadata::{parse_metadata, DEFAULT_SCAN_LINES};
use crate::ports::{ChangeSource, LedgerStore};
use crate::types::{ChangeRequest, ChangedFile, FileStatus, NewScriptRecord, SyncReport};

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub min_approvals: usize,
    /// How many merged change requests one pass inspects.
    pub window: usize,
    pub extension: String,
    pub path_prefix: Option<String>,
    pub metadata_scan_lines: usize,
    /// Bound on each change-source call.
    pub item_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_approvals: 1,
            window: 50,
            extension: ".sql".to_string(),
            path_prefix: None,
            metadata_scan_lines: DEFAULT_SCAN_LINES,
            item_timeout: Duration::from_secs(20),
        }
    }
}

impl ReconcileConfig {
    pub fn is_eligible(&self, file: &ChangedFile) -> bool {
        if file.status == FileStatus::Removed {
            return false;
        }
        let path = file.path.to_ascii_lowercase();
        if !path.ends_with(&self.extension.to_ascii_lowercase()) {
            return false;
        }
        match &self.path_prefix {
            Some(prefix) => {
                let prefix = prefix.trim_matches('/');
                prefix.is_empty()
                    || file
                        .path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            None => true,
        }
    }
}

/// Ledger name for a changed file: its file name.
pub fn script_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Skip {
    InsufficientApprovals { have: usize, need: usize },
    NoEligibleFiles,
    Duplicate,
    ContentNotFound,
    AlreadyImported,
}

pub struct ChangeSourceReconciler {
    source: Arc<dyn ChangeSource>,
    ledger: Arc<dyn LedgerStore>,
    config: ReconcileConfig,
}

impl ChangeSourceReconciler {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        ledger: Arc<dyn LedgerStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            source,
            ledger,
            config,
        }
    }

    pub fn source(&self) -> &Arc<dyn ChangeSource> {
        &self.source
    }

    /// Run one pass. Fails only if the change list or the ledger's name set
    /// cannot be read; per-item failures are counted in the report.
    pub async fn sync(&self) -> Result<SyncReport> {
        let mut names = self.ledger.existing_names().await?;
        let changes = self
            .bounded(
                "list merged change requests",
                self.source.list_merged_change_requests(self.config.window),
            )
            .await?;

        let mut report = SyncReport::default();
        for change in &changes {
            if let Err(e) = self.sync_change(change, &mut names, &mut report).await {
                warn!(change = change.id, error = %e, "reconciliation item failed");
                report.errors += 1;
            }
        }

        info!(
            inspected = changes.len(),
            synced = report.synced,
            skipped = report.skipped,
            errors = report.errors,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    async fn sync_change(
        &self,
        change: &ChangeRequest,
        names: &mut HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut approvers = self
            .bounded("list approvers", self.source.list_approvers(change.id))
            .await?;
        approvers.sort();
        approvers.dedup();

        if approvers.len() < self.config.min_approvals {
            skip(
                change,
                None,
                Skip::InsufficientApprovals {
                    have: approvers.len(),
                    need: self.config.min_approvals,
                },
                report,
            );
            return Ok(());
        }

        let files: Vec<ChangedFile> = self
            .bounded("list changed files", self.source.list_changed_files(change.id))
            .await?
            .into_iter()
            .filter(|f| self.config.is_eligible(f))
            .collect();

        if files.is_empty() {
            skip(change, None, Skip::NoEligibleFiles, report);
            return Ok(());
        }

        for file in &files {
            match self.sync_file(change, file, &approvers, names).await {
                Ok(None) => report.synced += 1,
                Ok(Some(reason)) => skip(change, Some(&file.path), reason, report),
                Err(e) => {
                    warn!(change = change.id, path = %file.path, error = %e, "failed to import script");
                    report.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Import one file. `Ok(None)` means a ledger entry was created.
    async fn sync_file(
        &self,
        change: &ChangeRequest,
        file: &ChangedFile,
        approvers: &[String],
        names: &mut HashSet<String>,
    ) -> Result<Option<Skip>> {
        let name = script_name(&file.path);
        if names.contains(&name) {
            return Ok(Some(Skip::Duplicate));
        }

        let Some(content) = self
            .bounded("fetch file content", self.source.fetch_file_content(&file.path))
            .await?
        else {
            return Ok(Some(Skip::ContentNotFound));
        };

        let meta = parse_metadata(&content, self.config.metadata_scan_lines);
        let record = NewScriptRecord {
            name: name.clone(),
            content,
            target_database: meta.target_or_default(),
            origin_reference: Some(change.url.clone()),
            approvers: approvers.to_vec(),
            approved_at: Some(change.merged_at),
            author: meta.author,
            purpose: meta.purpose,
            direct_prod: meta.direct_prod,
        };

        let inserted = self.ledger.insert_if_absent(&record).await?;
        names.insert(name.clone());
        if !inserted {
            // Lost a race with a concurrent pass.
            return Ok(Some(Skip::AlreadyImported));
        }

        info!(
            script = %name,
            change = change.id,
            target = %record.target_database,
            direct_prod = record.direct_prod,
            "imported change script"
        );
        Ok(None)
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.item_timeout, fut)
            .await
            .map_err(|_| anyhow!("{what} timed out after {:?}", self.config.item_timeout))?
    }
}

fn skip(change: &ChangeRequest, path: Option<&str>, reason: Skip, report: &mut SyncReport) {
    debug!(change = change.id, path = ?path, reason = ?reason, "skipped");
    report.skipped += 1;
}
