//! Leading metadata comment block of a change script.
//!
//! ```sql
//! -- Author: dana
//! -- Purpose: backfill order totals
//! -- Target: production
//! -- Date: 2026-03-01
//! -- DirectProd: yes
//! UPDATE orders SET ...
//! ```
//!
//! Field names are case-insensitive. Only comment lines within the first
//! `scan_lines` lines are considered. The direct-override marker is the
//! single token `DirectProd`, bare or with `true|yes|1`; spelling variants
//! such as `Direct-Prod` are not recognised.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Target;

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(author|purpose|target|date)\s*:\s*(.*?)\s*$").unwrap()
});
static DIRECT_PROD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^directprod(?:\s*:\s*(\S*))?\s*$").unwrap());

pub const DEFAULT_SCAN_LINES: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    pub author: Option<String>,
    pub purpose: Option<String>,
    pub target: Option<Target>,
    pub date: Option<String>,
    pub direct_prod: bool,
}

impl ScriptMetadata {
    /// Staging unless the header names a valid target.
    pub fn target_or_default(&self) -> Target {
        self.target.unwrap_or_default()
    }
}

pub fn parse_metadata(content: &str, scan_lines: usize) -> ScriptMetadata {
    let mut meta = ScriptMetadata::default();
    let mut in_block = false;

    for line in content.lines().take(scan_lines) {
        let Some(body) = comment_body(line, &mut in_block) else {
            continue;
        };

        if let Some(caps) = DIRECT_PROD.captures(body) {
            meta.direct_prod = match caps.get(1).map(|m| m.as_str()) {
                None | Some("") => true,
                Some(value) => matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
            };
            continue;
        }

        let Some(caps) = FIELD.captures(body) else {
            continue;
        };
        let value = caps[2].to_string();
        if value.is_empty() {
            continue;
        }
        match caps[1].to_ascii_lowercase().as_str() {
            "author" => meta.author = Some(value),
            "purpose" => meta.purpose = Some(value),
            "date" => meta.date = Some(value),
            "target" => meta.target = value.parse().ok(),
            _ => {}
        }
    }

    meta
}

/// Text of a comment line with its markers removed, or `None` for SQL.
fn comment_body<'a>(line: &'a str, in_block: &mut bool) -> Option<&'a str> {
    let mut text = line.trim();

    if *in_block {
        if let Some(rest) = text.strip_suffix("*/") {
            *in_block = false;
            text = rest;
        } else if text.contains("*/") {
            *in_block = false;
            return None;
        }
        return Some(text.trim_start_matches('*').trim());
    }

    if let Some(rest) = text.strip_prefix("--") {
        return Some(rest.trim_start_matches('-').trim());
    }

    if let Some(rest) = text.strip_prefix("/*") {
        match rest.strip_suffix("*/") {
            Some(inner) => return Some(inner.trim()),
            None => {
                *in_block = !rest.contains("*/");
                return Some(rest.trim_start_matches('*').trim());
            }
        }
    }

    None
}
