//! Per-resource outage episode deduplication.
//!
//! Retry loops hammer a down dependency every few seconds; without
//! deduplication every attempt would log and announce. `down()` reports
//! `true` only on the first call of an episode, `up()` only when the
//! resource was actually down, so each episode produces exactly one
//! down/up announcement pair regardless of retry noise.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// State for one tracked resource, created lazily on first `down()`/`up()`.
/// Records are never destroyed; the key space is bounded by the number of
/// distinct resources the process talks to.
#[derive(Debug, Clone, Default)]
pub struct OutageRecord {
    pub down: bool,
    pub last_down_at: Option<DateTime<Utc>>,
    pub last_reason: Option<String>,
    pub last_up_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct OutageDeduper {
    records: Mutex<HashMap<String, OutageRecord>>,
}

impl OutageDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a resource down. Returns `true` only if this call started a new
    /// outage episode (the resource was not already down).
    pub fn down(&self, key: &str, reason: impl Into<String>) -> bool {
        let mut records = self.records.lock();
        let record = records.entry(key.to_string()).or_default();
        if record.down {
            return false;
        }
        record.down = true;
        record.last_down_at = Some(Utc::now());
        record.last_reason = Some(reason.into());
        true
    }

    /// Mark a resource up. Returns `true` only if the resource was down,
    /// i.e. once per outage episode.
    pub fn up(&self, key: &str) -> bool {
        let mut records = self.records.lock();
        let record = records.entry(key.to_string()).or_default();
        if !record.down {
            return false;
        }
        record.down = false;
        record.last_up_at = Some(Utc::now());
        true
    }

    /// Snapshot of one resource's record, if it has ever been touched.
    pub fn record(&self, key: &str) -> Option<OutageRecord> {
        self.records.lock().get(key).cloned()
    }
}
