//! Tiered retention for stored audit entries
//!
//! A pass classifies every entry against its retention policy, producing the
//! log to keep (with newly archived entries stamped) and a summary. The store
//! swaps the result in under its own lock through [`AuditStore::rewrite`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::audit::{AuditEntry, RetentionPolicy};
use crate::audit_store::AuditStore;
use crate::errors::AuditResult;

/// Ages at which entries are archived and deleted, per policy.
#[derive(Debug, Clone)]
pub struct RetentionRules {
    pub phi_archive_after: Duration,
    pub phi_delete_after: Duration,
    pub standard_archive_after: Duration,
    pub standard_delete_after: Duration,
}

impl Default for RetentionRules {
    fn default() -> Self {
        Self {
            phi_archive_after: Duration::days(365),
            phi_delete_after: Duration::days(7 * 365),
            standard_archive_after: Duration::days(90),
            standard_delete_after: Duration::days(365),
        }
    }
}

impl RetentionRules {
    /// Default rules with the standard deletion age overridden.
    pub fn with_standard_retention_days(days: i64) -> Self {
        Self {
            standard_delete_after: Duration::days(days),
            ..Self::default()
        }
    }

    fn thresholds(&self, policy: RetentionPolicy) -> (Duration, Duration) {
        match policy {
            RetentionPolicy::Phi7Years => (self.phi_archive_after, self.phi_delete_after),
            RetentionPolicy::Standard1Year => {
                (self.standard_archive_after, self.standard_delete_after)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionAction {
    Keep,
    Archive,
    Delete,
}

/// Decides what a pass does with a single entry at `now`.
pub fn classify(entry: &AuditEntry, rules: &RetentionRules, now: DateTime<Utc>) -> RetentionAction {
    let age = now - entry.timestamp;
    let (archive_after, delete_after) = rules.thresholds(entry.retention());

    if age > delete_after {
        RetentionAction::Delete
    } else if age > archive_after && !entry.is_archived() {
        RetentionAction::Archive
    } else {
        RetentionAction::Keep
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSummary {
    pub kept: usize,
    pub archived: usize,
    pub deleted: usize,
}

/// Applies the rules to a full copy of the log.
pub fn apply_policies(
    entries: Vec<AuditEntry>,
    rules: &RetentionRules,
    now: DateTime<Utc>,
) -> (Vec<AuditEntry>, RetentionSummary) {
    let mut summary = RetentionSummary::default();
    let mut kept = Vec::with_capacity(entries.len());

    for mut entry in entries {
        match classify(&entry, rules, now) {
            RetentionAction::Delete => {
                summary.deleted += 1;
                continue;
            }
            RetentionAction::Archive => {
                entry.archived_at = Some(now);
                summary.archived += 1;
            }
            RetentionAction::Keep => {}
        }
        kept.push(entry);
    }
    summary.kept = kept.len();
    (kept, summary)
}

pub struct RetentionManager {
    store: Arc<dyn AuditStore>,
    rules: RetentionRules,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn AuditStore>, rules: RetentionRules) -> Self {
        Self { store, rules }
    }

    pub fn run_once(&self) -> AuditResult<RetentionSummary> {
        self.run_at(Utc::now())
    }

    pub fn run_at(&self, now: DateTime<Utc>) -> AuditResult<RetentionSummary> {
        let mut summary = RetentionSummary::default();
        self.store.rewrite(&mut |entries| {
            let (kept, pass) = apply_policies(entries, &self.rules, now);
            summary = pass;
            kept
        })?;

        tracing::info!(
            kept = summary.kept,
            archived = summary.archived,
            deleted = summary.deleted,
            "retention pass complete"
        );
        Ok(summary)
    }
}
