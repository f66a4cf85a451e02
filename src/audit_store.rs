//! Entry store for canonical audit entries
//!
//! [`AuditStore`] is the seam every other component talks to: the API layer,
//! the registry, both upstream pollers, the aggregation engine and the
//! retention manager all hold an `Arc<dyn AuditStore>`. [`MemoryAuditStore`]
//! keeps entries in a size-capped in-memory log.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::audit::{AuditEntry, EventType, LogLevel};
use crate::errors::{AuditResult, SafeLock};

const STORE_RESOURCE: &str = "entry_store";

/// Filters understood by [`AuditStore::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub service_name: Option<String>,
    pub event_type: Option<EventType>,
    pub user_id: Option<String>,
    pub log_level: Option<LogLevel>,
    pub phi_only: bool,
}

impl EntryFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(service) = &self.service_name {
            if &entry.service_name != service {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if entry.event_type != event_type {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if entry.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(level) = self.log_level {
            if entry.log_level != level {
                return false;
            }
        }
        !self.phi_only || entry.phi_accessed
    }
}

pub trait AuditStore: Send + Sync {
    /// Back-fills identity/lifecycle fields, appends at the tail and evicts
    /// from the head on overflow. Returns the entry as stored.
    fn append(&self, entry: AuditEntry) -> AuditResult<AuditEntry>;

    /// Most-recent-first scan returning at most `limit` matches.
    fn query(&self, filter: &EntryFilter, limit: usize) -> AuditResult<Vec<AuditEntry>>;

    /// Copy of every entry with `timestamp > since`, oldest first.
    fn entries_since(&self, since: DateTime<Utc>) -> AuditResult<Vec<AuditEntry>>;

    fn len(&self) -> AuditResult<usize>;

    fn is_empty(&self) -> AuditResult<bool> {
        Ok(self.len()? == 0)
    }

    fn capacity(&self) -> usize;

    /// Hands the whole log to `pass` and installs what it returns in one
    /// step, so no reader observes a half-applied rewrite.
    fn rewrite(&self, pass: &mut dyn FnMut(Vec<AuditEntry>) -> Vec<AuditEntry>)
        -> AuditResult<()>;
}

pub struct MemoryAuditStore {
    entries: Mutex<VecDeque<AuditEntry>>,
    max_entries: usize,
}

impl MemoryAuditStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Size the log is trimmed back to once it overflows. Trimming to 90%
    /// rather than to the cap keeps every insert at the boundary from paying
    /// for an eviction. Never below one, so the entry just appended survives.
    pub fn retained_after_eviction(&self) -> usize {
        (self.max_entries * 9 / 10).max(1)
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, mut entry: AuditEntry) -> AuditResult<AuditEntry> {
        entry.backfill(Utc::now());
        let stored = entry.clone();

        let evicted = {
            let mut entries = self.entries.safe_lock(STORE_RESOURCE)?;
            entries.push_back(entry);
            if entries.len() > self.max_entries {
                let excess = entries.len() - self.retained_after_eviction();
                entries.drain(..excess);
                excess
            } else {
                0
            }
        };

        if evicted > 0 {
            tracing::debug!(
                evicted,
                max_entries = self.max_entries,
                "entry store over capacity, evicted oldest entries"
            );
        }
        Ok(stored)
    }

    fn query(&self, filter: &EntryFilter, limit: usize) -> AuditResult<Vec<AuditEntry>> {
        let entries = self.entries.safe_lock(STORE_RESOURCE)?;
        Ok(entries
            .iter()
            .rev()
            .filter(|entry| filter.matches(entry))
            .take(limit)
            .cloned()
            .collect())
    }

    fn entries_since(&self, since: DateTime<Utc>) -> AuditResult<Vec<AuditEntry>> {
        let entries = self.entries.safe_lock(STORE_RESOURCE)?;
        Ok(entries
            .iter()
            .filter(|entry| entry.timestamp > since)
            .cloned()
            .collect())
    }

    fn len(&self) -> AuditResult<usize> {
        Ok(self.entries.safe_lock(STORE_RESOURCE)?.len())
    }

    fn capacity(&self) -> usize {
        self.max_entries
    }

    fn rewrite(
        &self,
        pass: &mut dyn FnMut(Vec<AuditEntry>) -> Vec<AuditEntry>,
    ) -> AuditResult<()> {
        let mut entries = self.entries.safe_lock(STORE_RESOURCE)?;
        let current: Vec<AuditEntry> = std::mem::take(&mut *entries).into();
        *entries = pass(current).into();
        Ok(())
    }
}
