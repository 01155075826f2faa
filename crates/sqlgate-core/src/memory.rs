//! In-memory port implementations for testing and local development.

use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::ports::{ExecutionLogStore, LedgerStore};
use crate::promotion;
use crate::types::*;

#[derive(Default)]
pub struct InMemoryLedgerStore {
    records: RwLock<BTreeMap<i64, ScriptRecord>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ledger directly, bypassing reconciliation.
    pub async fn seed(&self, record: NewScriptRecord) -> Result<ScriptRecord> {
        self.insert_if_absent(&record).await?;
        self.find_by_name(&record.name)
            .await
            .ok_or_else(|| anyhow!("seeded record {} missing", record.name))
    }

    pub async fn find_by_name(&self, name: &str) -> Option<ScriptRecord> {
        let records = self.records.read().await;
        records.values().find(|r| r.name == name).cloned()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn list(&self) -> Result<Vec<ScriptRecord>> {
        let records = self.records.read().await;
        Ok(records.values().rev().cloned().collect())
    }

    async fn get(&self, id: i64) -> Result<Option<ScriptRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&id).cloned())
    }

    async fn existing_names(&self) -> Result<HashSet<String>> {
        let records = self.records.read().await;
        Ok(records.values().map(|r| r.name.clone()).collect())
    }

    async fn insert_if_absent(&self, record: &NewScriptRecord) -> Result<bool> {
        let mut records = self.records.write().await;
        if records.values().any(|r| r.name == record.name) {
            return Ok(false);
        }
        let id = records.keys().next_back().map_or(1, |last| last + 1);
        let mut approvers = record.approvers.clone();
        approvers.sort();
        approvers.dedup();
        records.insert(
            id,
            ScriptRecord {
                id,
                name: record.name.clone(),
                content: record.content.clone(),
                target_database: record.target_database,
                origin_reference: record.origin_reference.clone(),
                approvers,
                approved_at: record.approved_at,
                author: record.author.clone(),
                purpose: record.purpose.clone(),
                staging_executed: false,
                staging_executed_at: None,
                production_executed: false,
                production_executed_at: None,
                direct_prod: record.direct_prod,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn mark_executed(&self, name: &str, target: Target, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .values_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| anyhow!("no ledger entry named {name}"))?;
        promotion::advance(record, target, at);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryExecutionLogStore {
    entries: RwLock<Vec<ExecutionLogEntry>>,
}

impl InMemoryExecutionLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionLogStore for InMemoryExecutionLogStore {
    async fn append(&self, entry: &NewExecutionLogEntry) -> Result<i64> {
        let mut entries = self.entries.write().await;
        let id = entries.len() as i64 + 1;
        entries.push(entry.clone().into_entry(id, Utc::now()));
        Ok(id)
    }

    async fn history(
        &self,
        script_name: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| script_name.map_or(true, |name| e.script_name == name))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn first_success_at(
        &self,
        script_name: &str,
        target: Target,
    ) -> Result<Option<DateTime<Utc>>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .find(|e| {
                e.script_name == script_name
                    && e.target == target
                    && e.status == ExecutionStatus::Success
            })
            .map(|e| e.executed_at))
    }
}
