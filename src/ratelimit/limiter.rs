//! The admission controller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::policy::{PolicyTable, Preset, WindowPolicy};
use super::store::{InMemoryStore, RequestLogStore, SweepReport};

/// How long the sweep keeps entries. Longer than any expected window so a
/// sweep never changes the outcome of a window calculation.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// The decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionResult {
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// Seconds until the window resets: the nominal window length when
    /// allowed, the time until the oldest entry expires when rejected
    pub reset_secs: u64,
    /// Set only when the request was rejected
    pub retry_after_secs: Option<u64>,
}

/// Read-only view of a key's usage under a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub count: u32,
    pub remaining: u32,
    pub limited: bool,
}

/// Decides whether requests may proceed, using a sliding window per key.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct AdmissionController {
    store: Arc<dyn RequestLogStore>,
    clock: Arc<dyn Clock>,
    policies: RwLock<PolicyTable>,
    retention: Duration,
}

/// Builder for [`AdmissionController`].
pub struct AdmissionControllerBuilder {
    store: Arc<dyn RequestLogStore>,
    clock: Arc<dyn Clock>,
    policies: PolicyTable,
    retention: Duration,
}

impl AdmissionControllerBuilder {
    pub fn store(mut self, store: Arc<dyn RequestLogStore>) -> Self {
        self.store = store;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn build(self) -> AdmissionController {
        AdmissionController {
            store: self.store,
            clock: self.clock,
            policies: RwLock::new(self.policies),
            retention: self.retention,
        }
    }
}

impl AdmissionController {
    /// Create a controller with an in-memory store and the system clock.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> AdmissionControllerBuilder {
        AdmissionControllerBuilder {
            store: Arc::new(InMemoryStore::new()),
            clock: Arc::new(SystemClock),
            policies: PolicyTable::new(),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Decide whether a request for `key` may proceed under `policy`.
    ///
    /// Admitted requests are recorded; rejected ones are not.
    pub async fn check(&self, key: &str, policy: &WindowPolicy) -> AdmissionResult {
        let now = self.clock.now_ms();
        let window_ms = policy.window_ms() as i64;
        let max_requests = policy.max_requests();

        let snapshot = self
            .store
            .record(key, now.saturating_sub(window_ms), now, max_requests)
            .await;

        trace!(
            key = %key,
            count = snapshot.count,
            max_requests = max_requests,
            window_ms = window_ms,
            "Checked admission"
        );

        if snapshot.admitted {
            return AdmissionResult {
                allowed: true,
                remaining: max_requests.saturating_sub(snapshot.count as u32),
                reset_secs: policy.nominal_reset_secs(),
                retry_after_secs: None,
            };
        }

        let oldest = snapshot.oldest.unwrap_or(now);
        let retry_after = ceil_secs(oldest.saturating_add(window_ms).saturating_sub(now));

        debug!(
            key = %key,
            count = snapshot.count,
            max_requests = max_requests,
            retry_after_secs = retry_after,
            "Rate limit exceeded"
        );

        AdmissionResult {
            allowed: false,
            remaining: 0,
            reset_secs: retry_after,
            retry_after_secs: Some(retry_after),
        }
    }

    /// [`check`](Self::check) against the policy currently configured for a
    /// preset.
    pub async fn check_preset(&self, key: &str, preset: Preset) -> AdmissionResult {
        let policy = self.policy(preset);
        self.check(key, &policy).await
    }

    /// Forget everything recorded for `key`.
    pub async fn reset(&self, key: &str) {
        let existed = self.store.remove(key).await;
        info!(key = %key, existed = existed, "Reset request log");
    }

    /// Report usage for `key` without recording anything.
    pub async fn stats(&self, key: &str, policy: &WindowPolicy) -> AdmissionStats {
        let now = self.clock.now_ms();
        let snapshot = self
            .store
            .peek(key, now.saturating_sub(policy.window_ms() as i64))
            .await;

        let count = snapshot.count as u32;
        AdmissionStats {
            count,
            remaining: policy.max_requests().saturating_sub(count),
            limited: count >= policy.max_requests(),
        }
    }

    /// Drop entries older than the retention horizon and forget idle keys.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now_ms();
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let horizon = now.saturating_sub(retention_ms);
        let report = self.store.sweep(horizon).await;

        debug!(
            scanned_keys = report.scanned_keys,
            removed_keys = report.removed_keys,
            evicted_entries = report.evicted_entries,
            "Swept request logs"
        );

        report
    }

    /// The policy currently configured for a preset.
    pub fn policy(&self, preset: Preset) -> WindowPolicy {
        self.policies.read().get(preset)
    }

    /// Replace the preset policies.
    pub fn set_policies(&self, policies: PolicyTable) {
        *self.policies.write() = policies;
        info!("Preset policies updated");
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Number of keys with a stored request log.
    pub async fn key_count(&self) -> usize {
        self.store.key_count().await
    }

    pub fn store(&self) -> &Arc<dyn RequestLogStore> {
        &self.store
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds to whole seconds, rounded up and never negative.
fn ceil_secs(ms: i64) -> u64 {
    (ms.max(0) as u64).div_ceil(1000)
}
