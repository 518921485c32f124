//! Request log storage.
//!
//! The controller keeps no state of its own; every request log lives behind
//! [`RequestLogStore`]. The in-memory store is the default, and a networked
//! store shared by several instances can be dropped in behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

/// What a key's log looked like after one window-filtered read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSnapshot {
    /// Entries inside the window, including the one just recorded
    pub count: usize,
    /// The earliest entry inside the window
    pub oldest: Option<i64>,
    /// Whether the current request was appended
    pub admitted: bool,
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub scanned_keys: usize,
    pub removed_keys: usize,
    pub evicted_entries: usize,
}

/// Storage for per-key request timestamps.
///
/// Implementations must make [`record`](Self::record) atomic per key: two
/// concurrent calls for the same key may not both observe a count below the
/// limit and both append.
#[async_trait]
pub trait RequestLogStore: Send + Sync {
    /// Drop every entry at or before `window_start`, write the filtered log
    /// back, and append `now` if fewer than `max_requests` entries remain.
    async fn record(
        &self,
        key: &str,
        window_start: i64,
        now: i64,
        max_requests: u32,
    ) -> WindowSnapshot;

    /// Count the entries after `window_start` without touching the log.
    async fn peek(&self, key: &str, window_start: i64) -> WindowSnapshot;

    /// Forget a key. Returns whether it was present.
    async fn remove(&self, key: &str) -> bool;

    /// Drop entries at or before `horizon` and delete keys left empty.
    async fn sweep(&self, horizon: i64) -> SweepReport;

    /// Number of keys currently stored.
    async fn key_count(&self) -> usize;
}

/// Process-local store backed by a sharded concurrent map.
///
/// Per-key atomicity comes from the shard write lock held for the duration
/// of each mutation.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    logs: DashMap<String, Vec<i64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestLogStore for InMemoryStore {
    async fn record(
        &self,
        key: &str,
        window_start: i64,
        now: i64,
        max_requests: u32,
    ) -> WindowSnapshot {
        let mut log = self.logs.entry(key.to_owned()).or_default();
        log.retain(|&ts| ts > window_start);

        let admitted = log.len() < max_requests as usize;
        if admitted {
            log.push(now);
        }

        WindowSnapshot {
            count: log.len(),
            oldest: log.iter().copied().min(),
            admitted,
        }
    }

    async fn peek(&self, key: &str, window_start: i64) -> WindowSnapshot {
        let Some(log) = self.logs.get(key) else {
            return WindowSnapshot::default();
        };

        let live = || log.iter().copied().filter(|&ts| ts > window_start);

        WindowSnapshot {
            count: live().count(),
            oldest: live().min(),
            admitted: false,
        }
    }

    async fn remove(&self, key: &str) -> bool {
        self.logs.remove(key).is_some()
    }

    async fn sweep(&self, horizon: i64) -> SweepReport {
        // Snapshot the keys first so no shard lock is held across the scan
        let keys: Vec<String> = self.logs.iter().map(|e| e.key().clone()).collect();

        let mut report = SweepReport {
            scanned_keys: keys.len(),
            ..Default::default()
        };

        for key in keys {
            let mut evicted = 0;
            let removed = self.logs.remove_if_mut(&key, |_, log| {
                let before = log.len();
                log.retain(|&ts| ts > horizon);
                evicted = before - log.len();
                log.is_empty()
            });

            report.evicted_entries += evicted;
            if removed.is_some() {
                trace!(key = %key, "Removed idle request log");
                report.removed_keys += 1;
            }
        }

        report
    }

    async fn key_count(&self) -> usize {
        self.logs.len()
    }
}
