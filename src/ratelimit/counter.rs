//! Sliding-window request log kept per caller key.

use std::collections::VecDeque;
use std::time::Duration;

use quanta::Instant;

use super::rules::LimitConfig;

/// The outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// The limit the request was checked against
    pub limit: u32,
    /// Requests still admissible inside the current window
    pub remaining: u32,
    /// When the oldest counted request leaves the window
    pub reset_at: Instant,
    /// Time from the check until `reset_at`
    pub reset_after: Duration,
    /// Whole seconds to wait before retrying; only set when denied
    pub retry_after_secs: Option<u32>,
}

impl Decision {
    /// Wall-clock reset time in epoch seconds, rounded up.
    pub fn reset_epoch_secs(&self) -> i64 {
        let wait = i64::try_from(ceil_secs(self.reset_after)).unwrap_or(i64::MAX);
        chrono::Utc::now().timestamp().saturating_add(wait)
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    let secs = nanos.div_ceil(1_000_000_000);
    u64::try_from(secs).unwrap_or(u64::MAX)
}

/// Admission timestamps for a single caller key.
///
/// Timestamps are kept in ascending order and only ever removed from the
/// front. `last_access` moves on every check, admitted or not, and drives
/// eviction.
#[derive(Debug, Clone)]
pub struct CounterEntry {
    timestamps: VecDeque<Instant>,
    last_access: Instant,
}

impl CounterEntry {
    /// Create an empty entry touched at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            timestamps: VecDeque::new(),
            last_access: now,
        }
    }

    /// When this entry was last checked.
    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Number of retained timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether no timestamps are retained.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Check and record one admission attempt.
    pub fn check(&mut self, now: Instant, config: &LimitConfig) -> Decision {
        self.last_access = now;
        self.prune(now, config.window);

        let count = self.timestamps.len();
        let max = config.max_requests as usize;
        let allowed = count < max;
        if allowed {
            self.timestamps.push_back(now);
        }

        let remaining = if allowed { max - count - 1 } else { 0 };
        let oldest = self.timestamps.front().copied();
        build_decision(now, config, allowed, remaining, oldest)
    }

    /// Compute the decision a check would produce, without recording it.
    pub fn peek(&self, now: Instant, config: &LimitConfig) -> Decision {
        let mut live = self
            .timestamps
            .iter()
            .copied()
            .filter(|ts| !is_expired(now, *ts, config.window));
        let oldest = live.next();
        let count = oldest.map_or(0, |_| 1 + live.count());

        let max = config.max_requests as usize;
        let allowed = count < max;
        let remaining = max.saturating_sub(count);
        build_decision(now, config, allowed, remaining, oldest)
    }

    /// Drop every timestamp at or before `now - window`.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if !is_expired(now, oldest, window) {
                break;
            }
            self.timestamps.pop_front();
        }
    }
}

/// `ts <= now - window`, without subtracting from an instant.
fn is_expired(now: Instant, ts: Instant, window: Duration) -> bool {
    now.saturating_duration_since(ts) >= window
}

/// Decision for `count` observed requests, with the oldest surviving one.
pub(crate) fn build_decision(
    now: Instant,
    config: &LimitConfig,
    allowed: bool,
    remaining: usize,
    oldest: Option<Instant>,
) -> Decision {
    let start = oldest.unwrap_or(now);
    let reset_after = config
        .window
        .saturating_sub(now.saturating_duration_since(start));
    // Windows built in code are unbounded; clamp to `now` if the sum overflows.
    let reset_at = start.checked_add(config.window).unwrap_or(now);
    let retry_after_secs = if allowed {
        None
    } else {
        Some(u32::try_from(ceil_secs(reset_after)).unwrap_or(u32::MAX))
    };

    Decision {
        allowed,
        limit: config.max_requests,
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset_at,
        reset_after,
        retry_after_secs,
    }
}
