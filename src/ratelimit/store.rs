//! The sliding-window counter store.
//!
//! Counters live in a sharded [`DashMap`]. A check holds the write lock of
//! one shard for the duration of a single entry's prune-count-append, so two
//! checks against the same key are serialized while checks against keys in
//! other shards proceed in parallel.
//!
//! Memory is bounded two ways:
//!
//! - **LRU batch eviction.** When an insert grows the store past
//!   `max_entries`, the least recently accessed tenth of the entries is
//!   removed in one pass. Sorting a snapshot costs O(n log n), but it runs
//!   once per ~10% growth rather than on every insert.
//! - **Periodic cleanup.** [`CleanupTask`] sweeps entries that hold no
//!   timestamps or have not been touched for `stale_after`. One-shot callers
//!   never trigger eviction themselves, so they are reclaimed here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use quanta::{Clock, Instant};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::counter::{build_decision, CounterEntry, Decision};
use super::rules::LimitConfig;
use crate::config::StoreConfig;

/// Rough per-entry cost: key string, map slot and deque header.
pub const ENTRY_OVERHEAD_BYTES: usize = 128;
/// Cost of one retained timestamp.
pub const TIMESTAMP_BYTES: usize = std::mem::size_of::<Instant>();

/// Default upper bound on tracked keys.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
/// Default idle time after which an entry is swept.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Coarse health indicator derived from store occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
}

/// Memory usage snapshot of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub entries: usize,
    pub max_entries: usize,
    pub total_timestamps: usize,
    pub approx_memory_bytes: usize,
    pub health_status: HealthStatus,
}

/// Sliding-window counters for every tracked caller key.
pub struct CounterStore {
    entries: DashMap<String, CounterEntry>,
    max_entries: usize,
    stale_after: Duration,
    clock: Clock,
    evicting: AtomicBool,
}

impl CounterStore {
    /// Create a store bounded to `max_entries` keys.
    pub fn new(max_entries: usize, stale_after: Duration) -> Self {
        Self::with_clock(max_entries, stale_after, Clock::new())
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(max_entries: usize, stale_after: Duration, clock: Clock) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            stale_after,
            clock,
            evicting: AtomicBool::new(false),
        }
    }

    /// Create a store from the service configuration.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.max_entries, config.stale_after())
    }

    /// Check and record one admission attempt for `key`.
    ///
    /// Never fails: an unknown key is tracked from this call on, and capacity
    /// pressure is relieved by evicting other keys.
    pub fn check(&self, key: &str, config: &LimitConfig) -> Decision {
        let now = self.clock.now();
        let mut inserted = false;

        let decision = match self.entries.get_mut(key) {
            Some(mut entry) => entry.check(now, config),
            None => {
                let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
                    inserted = true;
                    CounterEntry::new(now)
                });
                entry.check(now, config)
            }
        };

        trace!(
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            limit = decision.limit,
            "Checked sliding window"
        );

        if inserted && self.entries.len() > self.max_entries {
            self.evict_least_recently_used();
        }

        decision
    }

    /// The decision `check` would return, without consuming a slot.
    ///
    /// Does not create an entry or touch `last_access`.
    pub fn get_stats(&self, key: &str, config: &LimitConfig) -> Decision {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(entry) => entry.peek(now, config),
            None => {
                let max = config.max_requests as usize;
                build_decision(now, config, max > 0, max, None)
            }
        }
    }

    /// Forget the counter for `key`. Returns whether one existed.
    pub fn reset(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            debug!(key = %key, "Rate limit counter reset");
        }
        removed
    }

    /// Forget every counter.
    pub fn reset_all(&self) {
        self.entries.clear();
        info!("All rate limit counters reset");
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is currently tracked.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// The configured capacity.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Current memory usage estimate.
    pub fn memory_stats(&self) -> MemoryStats {
        let mut entries = 0;
        let mut total_timestamps = 0;
        for entry in self.entries.iter() {
            entries += 1;
            total_timestamps += entry.len();
        }

        let health_status = if entries * 10 >= self.max_entries * 9 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        MemoryStats {
            entries,
            max_entries: self.max_entries,
            total_timestamps,
            approx_memory_bytes: entries * ENTRY_OVERHEAD_BYTES
                + total_timestamps * TIMESTAMP_BYTES,
            health_status,
        }
    }

    /// Remove empty and stale entries. Returns the number removed.
    ///
    /// Shards are locked one at a time, so concurrent checks on other shards
    /// keep running during the sweep.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let stale_after = self.stale_after;
        let before = self.entries.len();

        self.entries.retain(|_, entry| {
            !entry.is_empty() && now.saturating_duration_since(entry.last_access()) < stale_after
        });

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Swept idle rate limit counters");
        }
        removed
    }

    /// Drop the least recently accessed tenth of the store.
    ///
    /// Inserts that cross the bound while another thread is evicting leave
    /// it to that thread, which re-checks the size after each pass.
    fn evict_least_recently_used(&self) {
        loop {
            if self
                .evicting
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            self.evict_batch();
            self.evicting.store(false, Ordering::Release);

            if self.entries.len() <= self.max_entries {
                return;
            }
        }
    }

    fn evict_batch(&self) {
        let len = self.entries.len();
        if len <= self.max_entries {
            return;
        }
        let batch = self.max_entries.div_ceil(10).max(len - self.max_entries);

        let mut snapshot: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_access()))
            .collect();
        snapshot.sort_by_key(|(_, last_access)| *last_access);

        let mut evicted = 0;
        for (key, seen) in snapshot.into_iter().take(batch) {
            // Skip keys touched again since the snapshot was taken.
            if self
                .entries
                .remove_if(&key, |_, entry| entry.last_access() <= seen)
                .is_some()
            {
                evicted += 1;
            }
        }

        warn!(
            evicted,
            max_entries = self.max_entries,
            remaining = self.entries.len(),
            "Rate limit store over capacity, evicted least recently used counters"
        );
    }
}

/// Background task running [`CounterStore::cleanup`] on a fixed interval.
pub struct CleanupTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(store: Arc<CounterStore>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            info!(interval_secs = interval.as_secs(), "Rate limit cleanup task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.cleanup();
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            info!("Rate limit cleanup task stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Rate limit cleanup task ended abnormally");
        }
    }
}
