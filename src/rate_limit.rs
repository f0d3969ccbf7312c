//! Fixed-window request counters per scoped key.
//!
//! Keys are `scope:dimension:identifier` (for example
//! `comment:create:ip:203.0.113.9`). Each key owns one window; the
//! check-and-increment happens under that key's map entry lock, so a window
//! never admits more than its limit regardless of how calls interleave.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::Method;
use dashmap::DashMap;
use tracing::warn;

use crate::auth::GatewayError;

/// Retry hint handed out when a rule is misconfigured.
const INVALID_RULE_RETRY: Duration = Duration::from_secs(60);

/// Identifiers longer than this are cut before they become map keys.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// A limit of `limit` requests per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    pub limit: u32,
    pub window: Duration,
}

impl RateRule {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn is_valid(&self) -> bool {
        self.limit > 0 && !self.window.is_zero()
    }
}

/// Which attribute of the caller a key counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Ip,
    User,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Ip => "ip",
            Dimension::User => "user",
        }
    }
}

/// Build a `scope:dimension:identifier` key. The identifier is truncated and
/// stripped of control characters.
pub fn rate_key(scope: &str, dimension: Dimension, identifier: &str) -> String {
    let identifier: String = identifier
        .chars()
        .take(MAX_IDENTIFIER_LENGTH)
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    format!("{}:{}:{}", scope, dimension.as_str(), identifier)
}

/// Outcome of a single `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests counted in the current window, including this one if allowed
    pub count: u32,
    pub remaining: u32,
    /// Time until the current window closes
    pub retry_after: Duration,
}

/// Snapshot of a key's current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    pub count: u32,
    pub window_start: Instant,
    pub limit: u32,
    pub window: Duration,
}

/// Storage for rate windows. In-memory for a single instance; a shared cache
/// implementation keeps the same contract across instances.
pub trait WindowStore: Send + Sync {
    /// Atomically roll the window if it elapsed, then admit and count the
    /// request if the window has room.
    fn hit(&self, key: &str, rule: RateRule, now: Instant) -> RateDecision;

    fn status(&self, key: &str) -> Option<RateStatus>;

    /// Remove windows that have elapsed. Returns the number removed.
    fn purge(&self, now: Instant) -> usize;

    fn len(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start: Instant,
    count: u32,
    limit: u32,
    window: Duration,
    last_hit: Instant,
}

impl RateWindow {
    fn elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window
    }
}

/// Bounded in-memory window store.
pub struct MemoryWindowStore {
    windows: DashMap<String, RateWindow>,
    max_entries: usize,
}

impl MemoryWindowStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Purge stale windows; if the map is still full, evict the least recently
    /// hit keys in one batch.
    fn make_room(&self, now: Instant) {
        self.purge(now);
        // Other threads evict concurrently, so work from one snapshot
        let len = self.windows.len();
        if len < self.max_entries {
            return;
        }

        let mut by_age: Vec<(Instant, String)> = self
            .windows
            .iter()
            .map(|entry| (entry.value().last_hit, entry.key().clone()))
            .collect();
        by_age.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let batch = (self.max_entries / 100).max(1);
        let excess = (len + 1).saturating_sub(self.max_entries);
        for (_, key) in by_age.into_iter().take(batch.max(excess)) {
            self.windows.remove(&key);
        }
    }
}

impl WindowStore for MemoryWindowStore {
    fn hit(&self, key: &str, rule: RateRule, now: Instant) -> RateDecision {
        if self.windows.len() >= self.max_entries && !self.windows.contains_key(key) {
            self.make_room(now);
        }

        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow {
                window_start: now,
                count: 0,
                limit: rule.limit,
                window: rule.window,
                last_hit: now,
            });

        if window.elapsed(now) {
            window.window_start = now;
            window.count = 0;
        }
        window.limit = rule.limit;
        window.window = rule.window;
        window.last_hit = window.last_hit.max(now);

        let allowed = window.count < rule.limit;
        if allowed {
            window.count += 1;
        }

        RateDecision {
            allowed,
            count: window.count,
            remaining: rule.limit.saturating_sub(window.count),
            retry_after: (window.window_start + rule.window).saturating_duration_since(now),
        }
    }

    fn status(&self, key: &str) -> Option<RateStatus> {
        self.windows.get(key).map(|w| RateStatus {
            count: w.count,
            window_start: w.window_start,
            limit: w.limit,
            window: w.window,
        })
    }

    fn purge(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.elapsed(now));
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

/// A rate rule attached to a route.
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// Key scope, e.g. `comment:create`
    pub scope: String,
    pub method: Method,
    pub path: String,
    pub rule: RateRule,
    pub dimensions: Vec<Dimension>,
}

impl RouteRule {
    pub fn new(scope: &str, method: Method, path: &str, rule: RateRule) -> Self {
        Self {
            scope: scope.to_string(),
            method,
            path: path.to_string(),
            rule,
            dimensions: vec![Dimension::Ip, Dimension::User],
        }
    }

    pub fn with_dimensions(mut self, dimensions: &[Dimension]) -> Self {
        self.dimensions = dimensions.to_vec();
        self
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == method && self.path == path
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Upper bound on tracked keys
    pub max_entries: usize,
    /// Per-IP rule applied to every request under the `api` scope
    pub global: Option<RateRule>,
    pub routes: Vec<RouteRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            global: Some(RateRule::per_minute(300)),
            routes: vec![
                RouteRule::new(
                    "comment:create",
                    Method::POST,
                    "/api/comments",
                    RateRule::per_minute(10),
                ),
                RouteRule::new(
                    "token:refresh",
                    Method::POST,
                    "/api/tokens/refresh",
                    RateRule::per_minute(20),
                )
                .with_dimensions(&[Dimension::Ip]),
            ],
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn in_memory(config: RateLimitConfig) -> Self {
        Self::new(Arc::new(MemoryWindowStore::new(config.max_entries)), config)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// The route rule for a request, if any.
    pub fn route_rule(&self, method: &Method, path: &str) -> Option<&RouteRule> {
        self.config.routes.iter().find(|r| r.matches(method, path))
    }

    /// Check and count one request against `key`. A misconfigured rule
    /// rejects instead of failing the request path.
    pub fn check(&self, key: &str, rule: RateRule) -> RateDecision {
        if !rule.is_valid() {
            warn!(key, limit = rule.limit, window_ms = rule.window.as_millis() as u64, "Invalid rate rule, rejecting request");
            return RateDecision {
                allowed: false,
                count: 0,
                remaining: 0,
                retry_after: INVALID_RULE_RETRY,
            };
        }
        self.store.hit(key, rule, Instant::now())
    }

    /// Check each dimension in order; the first one over its limit stops the
    /// remaining checks.
    pub fn check_dimensions(
        &self,
        scope: &str,
        identifiers: &[(Dimension, &str)],
        rule: RateRule,
    ) -> Result<(), GatewayError> {
        for (dimension, identifier) in identifiers {
            let key = rate_key(scope, *dimension, identifier);
            let decision = self.check(&key, rule);
            if !decision.allowed {
                return Err(GatewayError::rate_limited(decision.retry_after));
            }
        }
        Ok(())
    }

    pub fn status(&self, key: &str) -> Option<RateStatus> {
        self.store.status(key)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.store.purge(Instant::now())
    }

    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }
}
