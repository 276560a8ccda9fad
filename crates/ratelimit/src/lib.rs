//! Token-bucket rate limiter gating calls to external services.
//!
//! Buckets are keyed (e.g. `"embedding"`, `"qdrant_upsert"`) and live in an
//! in-memory map; refill is computed lazily on each access rather than by a
//! ticking background task. A separate sweeper evicts buckets nobody has
//! touched in a while so long-running processes don't accumulate one entry
//! per ephemeral key forever.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-key configuration, supplied by the caller on every operation rather
/// than registered up front — this lets different callers share one limiter
/// while disagreeing about a key's limits without coordination.
#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub max_tokens: f64,
    pub refill_rate_per_sec: f64,
    pub enabled: bool,
}

impl BucketConfig {
    pub fn unlimited() -> Self {
        Self {
            max_tokens: 0.0,
            refill_rate_per_sec: 0.0,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitStatus {
    pub allowed: bool,
    pub remaining: f64,
    /// Milliseconds since epoch at which the bucket will next have at least
    /// one full token available, if currently exhausted.
    pub reset_at_ms: i64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

impl Bucket {
    fn new(initial: f64) -> Self {
        let now = Instant::now();
        Self {
            tokens: initial,
            last_refill: now,
            last_access: now,
        }
    }

    fn refill(&mut self, cfg: &BucketConfig, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * cfg.refill_rate_per_sec).min(cfg.max_tokens);
            self.last_refill = now;
        }
        self.last_access = now;
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// In-memory keyed token-bucket rate limiter.
pub struct RateLimiter {
    buckets: Arc<DashMap<String, Mutex<Bucket>>>,
    ttl: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

impl RateLimiter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Checks whether `n` tokens could be consumed from `key` without
    /// actually consuming them.
    pub fn check_limit(&self, key: &str, cfg: BucketConfig) -> LimitStatus {
        self.access(key, cfg, 0.0)
    }

    /// Consumes `n` tokens from `key`, returning whether the consumption was
    /// allowed. If disallowed, no tokens are deducted.
    pub fn consume(&self, key: &str, n: f64, cfg: BucketConfig) -> LimitStatus {
        self.access(key, cfg, n)
    }

    /// Reports current state without mutating refill bookkeeping beyond a
    /// normal lazy refill.
    pub fn status(&self, key: &str, cfg: BucketConfig) -> LimitStatus {
        self.access(key, cfg, 0.0)
    }

    pub fn reset(&self, key: &str, cfg: BucketConfig) {
        if !cfg.enabled {
            self.buckets.remove(key);
            return;
        }
        self.buckets
            .insert(key.to_string(), Mutex::new(Bucket::new(cfg.max_tokens)));
    }

    fn access(&self, key: &str, cfg: BucketConfig, consume_n: f64) -> LimitStatus {
        if !cfg.enabled {
            return LimitStatus {
                allowed: true,
                remaining: cfg.max_tokens,
                reset_at_ms: now_ms(),
            };
        }

        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(cfg.max_tokens)));
        let mut bucket = entry.lock();

        let now = Instant::now();
        bucket.refill(&cfg, now);

        let allowed = bucket.tokens >= consume_n;
        if allowed && consume_n > 0.0 {
            bucket.tokens -= consume_n;
        }

        let reset_at_ms = if bucket.tokens >= cfg.max_tokens || cfg.refill_rate_per_sec <= 0.0 {
            now_ms()
        } else {
            let deficit = cfg.max_tokens - bucket.tokens;
            let secs_to_full = deficit / cfg.refill_rate_per_sec;
            now_ms() + (secs_to_full * 1000.0).ceil() as i64
        };

        LimitStatus {
            allowed,
            remaining: bucket.tokens.max(0.0),
            reset_at_ms,
        }
    }

    /// Spawns the background sweeper that evicts buckets idle longer than
    /// `ttl`, checking every `period`. Returns a handle the owner can abort
    /// on shutdown.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                limiter.sweep();
            }
        })
    }

    fn sweep(&self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.buckets.retain(|_, bucket| {
            let last_access = bucket.lock().last_access;
            now.duration_since(last_access) < ttl
        });
    }

    /// Default sweeper period per §4.1 (5 minutes); exposed for callers that
    /// want to wire `spawn_sweeper` without repeating the constant.
    pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(5 * 60);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg() -> BucketConfig {
        BucketConfig {
            max_tokens: 5.0,
            refill_rate_per_sec: 1.0,
            enabled: true,
        }
    }

    #[test]
    fn consumes_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::default();
        for _ in 0..5 {
            let status = limiter.consume("k", 1.0, cfg());
            assert!(status.allowed);
        }
        let status = limiter.consume("k", 1.0, cfg());
        assert!(!status.allowed);
    }

    #[test]
    fn disabled_always_allows_and_reports_max() {
        let limiter = RateLimiter::default();
        let disabled = BucketConfig {
            enabled: false,
            ..cfg()
        };
        for _ in 0..100 {
            let status = limiter.consume("k", 1.0, disabled);
            assert!(status.allowed);
            assert_eq!(status.remaining, disabled.max_tokens);
        }
    }

    #[test]
    fn refill_is_lazy_and_bounded_by_max() {
        let limiter = RateLimiter::default();
        for _ in 0..5 {
            limiter.consume("k", 1.0, cfg());
        }
        std::thread::sleep(Duration::from_millis(1100));
        let status = limiter.consume("k", 1.0, cfg());
        assert!(status.allowed);
        assert!(status.remaining <= cfg().max_tokens);
    }

    #[test]
    fn distinct_keys_do_not_share_buckets() {
        let limiter = RateLimiter::default();
        for _ in 0..5 {
            assert!(limiter.consume("a", 1.0, cfg()).allowed);
        }
        assert!(limiter.consume("b", 1.0, cfg()).allowed);
    }

    #[test]
    fn reset_refills_to_max() {
        let limiter = RateLimiter::default();
        for _ in 0..5 {
            limiter.consume("k", 1.0, cfg());
        }
        limiter.reset("k", cfg());
        let status = limiter.status("k", cfg());
        assert_eq!(status.remaining, cfg().max_tokens);
    }

    #[tokio::test]
    async fn sweeper_evicts_idle_buckets() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(50)));
        limiter.consume("k", 1.0, cfg());
        assert_eq!(limiter.buckets.len(), 1);
        tokio::time::sleep(Duration::from_millis(80)).await;
        limiter.sweep();
        assert_eq!(limiter.buckets.len(), 0);
    }

    proptest! {
        /// `consumed(key) <= ceil(maxTokens + W * refillRate)` over the window
        /// `W` actually elapsed during the test, with a small epsilon for
        /// scheduling jitter between the `Instant::now()` calls.
        #[test]
        fn consumption_never_exceeds_max_plus_refill(
            max_tokens in 1.0f64..50.0,
            refill_rate in 0.0f64..50.0,
            requests in proptest::collection::vec(0.1f64..3.0, 1..50),
        ) {
            let limiter = RateLimiter::default();
            let bucket_cfg = BucketConfig { max_tokens, refill_rate_per_sec: refill_rate, enabled: true };
            let started = Instant::now();
            let mut consumed = 0.0;
            for amount in requests {
                let status = limiter.consume("k", amount, bucket_cfg);
                if status.allowed {
                    consumed += amount;
                }
            }
            let window = started.elapsed().as_secs_f64();
            let bound = max_tokens + window * refill_rate + 0.01;
            prop_assert!(consumed <= bound);
        }

        #[test]
        fn disabled_bucket_always_allows_and_tracks_nothing(requests in proptest::collection::vec(0.1f64..3.0, 1..20)) {
            let limiter = RateLimiter::default();
            let disabled = BucketConfig::unlimited();
            for amount in requests {
                let status = limiter.consume("k", amount, disabled);
                prop_assert!(status.allowed);
            }
            prop_assert!(!limiter.buckets.contains_key("k"));
        }
    }
}
