//! Temporary blocks for clients that keep failing security checks.
//!
//! Every CSRF or rate-limit rejection is recorded against the client identity.
//! Failures are counted with a keyed token bucket; once an identity exhausts
//! its allowance it is blocked for a bounded period, on top of the
//! per-request rejections.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use tracing::warn;

/// Per-identity failure counter.
pub type FailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Failures tolerated within `window`
    pub threshold: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(15 * 60),
        }
    }
}

pub struct ViolationTracker {
    failures: FailureLimiter,
    blocks: DashMap<String, Instant>,
    block_duration: Duration,
}

impl ViolationTracker {
    pub fn new(config: &EscalationConfig) -> Self {
        let threshold = NonZeroU32::new(config.threshold).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(config.window / threshold.get())
            .map(|q| q.allow_burst(threshold))
            .unwrap_or_else(|| Quota::per_minute(threshold));

        Self {
            failures: RateLimiter::keyed(quota),
            blocks: DashMap::new(),
            block_duration: config.block_duration,
        }
    }

    /// Remaining block time for `identity`, if it is blocked.
    pub fn blocked(&self, identity: &str) -> Option<Duration> {
        let until = *self.blocks.get(identity)?;
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.blocks.remove_if(identity, |_, until| *until <= Instant::now());
            return None;
        }
        Some(remaining)
    }

    /// Record one failure. Returns the block duration if this failure tipped
    /// the identity over its allowance.
    pub fn record_violation(&self, identity: &str, kind: &'static str) -> Option<Duration> {
        let key = identity.to_string();
        if self.failures.check_key(&key).is_ok() {
            return None;
        }

        self.blocks
            .insert(key, Instant::now() + self.block_duration);
        warn!(
            client_ip = identity,
            kind,
            block_secs = self.block_duration.as_secs(),
            "Repeated violations, client temporarily blocked"
        );
        Some(self.block_duration)
    }

    /// Drop elapsed blocks and idle failure counters.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.blocks.len();
        self.blocks.retain(|_, until| *until > now);
        self.failures.retain_recent();
        self.failures.shrink_to_fit();
        before.saturating_sub(self.blocks.len())
    }
}
