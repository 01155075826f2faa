//! Promotion gate
//!
//! Per-script state machine deciding where a ledger entry may run.
//!
//! ```text
//! Pending ──staging ok──► ReadyForProduction ──production ok──┐
//!    │                                                         ▼
//!    └──────────────────────production ok────────────────► Completed
//! DirectEligible ───────────production ok──────────────────────┘
//! ```
//!
//! State is derived from the record's flags, and the flags only ever move
//! from false to true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ScriptRecord, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionState {
    Pending,
    ReadyForProduction,
    DirectEligible,
    Completed,
}

impl PromotionState {
    pub fn of(record: &ScriptRecord) -> Self {
        if record.production_executed {
            Self::Completed
        } else if record.staging_executed {
            Self::ReadyForProduction
        } else if record.direct_prod {
            Self::DirectEligible
        } else {
            Self::Pending
        }
    }
}

/// Production attempt refused by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "script '{script}' has not been executed on staging and is not flagged DirectProd; \
     run it on staging first or add a `-- DirectProd` marker to its header"
)]
pub struct PromotionRejection {
    pub script: String,
}

impl PromotionRejection {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

pub fn can_execute_on_production(record: &ScriptRecord) -> bool {
    record.staging_executed || record.direct_prod
}

/// Gate check evaluated before any database call. Staging is always open.
pub fn authorize(record: &ScriptRecord, target: Target) -> Result<(), PromotionRejection> {
    match target {
        Target::Staging => Ok(()),
        Target::Production if can_execute_on_production(record) => Ok(()),
        Target::Production => Err(PromotionRejection::new(&record.name)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: PromotionState,
    pub to: PromotionState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Apply a successful run on `target` to `record`. Flags only move to true
/// and an existing timestamp is never overwritten.
pub fn advance(record: &mut ScriptRecord, target: Target, at: DateTime<Utc>) -> Transition {
    let from = PromotionState::of(record);
    let (flag, stamp) = match target {
        Target::Staging => (
            &mut record.staging_executed,
            &mut record.staging_executed_at,
        ),
        Target::Production => (
            &mut record.production_executed,
            &mut record.production_executed_at,
        ),
    };
    *flag = true;
    stamp.get_or_insert(at);
    Transition {
        from,
        to: PromotionState::of(record),
    }
}
