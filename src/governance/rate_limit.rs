use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout as with_timeout};

use crate::{
    governance::permission::{CODE_RATE_LIMIT, Permission},
    policy::model::{RateLimitPolicy, SlidingWindow, conditions_match},
    request::ServiceRequest,
};

pub const REALIZE_SLIDING_WINDOW: &str = "sliding_window";
pub const REALIZE_TOKEN_BUCKET: &str = "token_bucket";
pub const REALIZE_REMOTE: &str = "remote";

const SLIDING_WINDOW_BUCKETS: u64 = 10;

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("quota backend is unavailable: {0}")]
    Unavailable(String),
    #[error("quota backend timed out after {0:?}")]
    Timeout(Duration),
    #[error("quota backend failed: {0}")]
    Backend(String),
}

/// Admission against one or more windows of a rate-limit policy.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Reserves `permits` before `timeout` elapses; `false` means deny.
    async fn acquire(&self, permits: u32, timeout: Duration) -> bool;

    /// Releases backing resources. Never fails.
    fn close(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    index: u64,
    count: u32,
}

/// Local sliding window kept as a ring of sub-buckets.
pub struct SlidingWindowLimiter {
    window: SlidingWindow,
    bucket_ms: u64,
    origin: Instant,
    buckets: Mutex<Vec<Bucket>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: SlidingWindow) -> Self {
        let bucket_ms = (window.time_window_ms / SLIDING_WINDOW_BUCKETS).max(1);
        Self {
            window,
            bucket_ms,
            origin: Instant::now(),
            buckets: Mutex::new(vec![Bucket::default(); SLIDING_WINDOW_BUCKETS as usize]),
        }
    }

    fn current_index(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 / self.bucket_ms
    }

    /// Admits immediately, or returns how long until the oldest bucket expires.
    fn try_acquire_now(&self, permits: u32) -> Result<(), Duration> {
        let now = self.current_index();
        let mut buckets = self.buckets.lock();
        let live = |bucket: &Bucket| bucket.count > 0 && now - bucket.index < SLIDING_WINDOW_BUCKETS;

        let used: u64 = buckets
            .iter()
            .filter(|bucket| live(*bucket))
            .map(|bucket| u64::from(bucket.count))
            .sum();
        if used + u64::from(permits) <= u64::from(self.window.threshold) {
            let slot = &mut buckets[(now % SLIDING_WINDOW_BUCKETS) as usize];
            if slot.index != now {
                *slot = Bucket {
                    index: now,
                    count: 0,
                };
            }
            slot.count += permits;
            return Ok(());
        }

        let oldest = buckets
            .iter()
            .filter(|bucket| live(*bucket))
            .map(|bucket| bucket.index)
            .min()
            .unwrap_or(now);
        let expires_at_ms = (oldest + SLIDING_WINDOW_BUCKETS) * self.bucket_ms;
        let elapsed_ms = self.origin.elapsed().as_millis() as u64;
        Err(Duration::from_millis(expires_at_ms.saturating_sub(elapsed_ms).max(1)))
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn acquire(&self, permits: u32, timeout: Duration) -> bool {
        if permits > self.window.threshold {
            return false;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let wait = match self.try_acquire_now(permits) {
                Ok(()) => return true,
                Err(wait) => wait,
            };
            if Instant::now() + wait > deadline {
                return false;
            }
            sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Smooth-rate limiter refilling `threshold` tokens per window.
pub struct TokenBucketLimiter {
    capacity: f64,
    rate_per_second: f64,
    bucket: Mutex<TokenBucket>,
}

impl TokenBucketLimiter {
    pub fn new(window: SlidingWindow) -> Self {
        let capacity = f64::from(window.threshold.max(1));
        let seconds = Duration::from_millis(window.time_window_ms.max(1)).as_secs_f64();
        Self {
            capacity,
            rate_per_second: capacity / seconds,
            bucket: Mutex::new(TokenBucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn acquire(&self, permits: u32, timeout: Duration) -> bool {
        let permits = f64::from(permits);
        if permits > self.capacity {
            return false;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let should_sleep = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                if elapsed > 0.0 {
                    bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.capacity);
                    bucket.last_refill = now;
                }

                if bucket.tokens >= permits {
                    bucket.tokens -= permits;
                    None
                } else {
                    let deficit = permits - bucket.tokens;
                    Some(Duration::from_secs_f64(
                        (deficit / self.rate_per_second).max(0.001),
                    ))
                }
            };

            match should_sleep {
                None => return true,
                Some(duration) if Instant::now() + duration > deadline => return false,
                Some(duration) => sleep(duration).await,
            }
        }
    }
}

/// Admits only when every member admits.
///
/// Members are asked in order; permits taken by earlier members are not returned
/// when a later member denies.
pub struct GroupRateLimiter {
    members: Vec<Arc<dyn RateLimiter>>,
}

impl GroupRateLimiter {
    pub fn new(members: Vec<Arc<dyn RateLimiter>>) -> Self {
        Self { members }
    }
}

#[async_trait]
impl RateLimiter for GroupRateLimiter {
    async fn acquire(&self, permits: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for member in &self.members {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !member.acquire(permits, remaining).await {
                return false;
            }
        }
        true
    }

    fn close(&self) {
        for member in &self.members {
            member.close();
        }
    }
}

/// External quota backend, e.g. a shared counter service.
#[async_trait]
pub trait QuotaClient: Send + Sync {
    async fn acquire(
        &self,
        key: &str,
        permits: u32,
        window: &SlidingWindow,
    ) -> Result<bool, LimiterError>;

    fn close(&self) {}
}

/// Delegates to a [`QuotaClient`] and admits whenever the backend cannot answer.
pub struct RemoteRateLimiter {
    key: String,
    window: SlidingWindow,
    client: Arc<dyn QuotaClient>,
}

impl RemoteRateLimiter {
    pub fn new(key: impl Into<String>, window: SlidingWindow, client: Arc<dyn QuotaClient>) -> Self {
        Self {
            key: key.into(),
            window,
            client,
        }
    }
}

#[async_trait]
impl RateLimiter for RemoteRateLimiter {
    async fn acquire(&self, permits: u32, timeout: Duration) -> bool {
        let result = match with_timeout(timeout, self.client.acquire(&self.key, permits, &self.window)).await {
            Ok(result) => result,
            Err(_) => Err(LimiterError::Timeout(timeout)),
        };
        match result {
            Ok(admitted) => admitted,
            Err(err) => {
                tracing::warn!(
                    target: "governance",
                    limiter = %self.key,
                    error = %err,
                    "rate_limiter_fail_open"
                );
                true
            }
        }
    }

    fn close(&self) {
        self.client.close();
    }
}

/// Builds the limiter for one window of a policy.
pub trait RateLimiterFactory: Send + Sync {
    fn create(&self, key: &str, window: SlidingWindow) -> Arc<dyn RateLimiter>;
}

pub struct SlidingWindowFactory;

impl RateLimiterFactory for SlidingWindowFactory {
    fn create(&self, _key: &str, window: SlidingWindow) -> Arc<dyn RateLimiter> {
        Arc::new(SlidingWindowLimiter::new(window))
    }
}

pub struct TokenBucketFactory;

impl RateLimiterFactory for TokenBucketFactory {
    fn create(&self, _key: &str, window: SlidingWindow) -> Arc<dyn RateLimiter> {
        Arc::new(TokenBucketLimiter::new(window))
    }
}

pub struct RemoteFactory {
    client: Arc<dyn QuotaClient>,
}

impl RemoteFactory {
    pub fn new(client: Arc<dyn QuotaClient>) -> Self {
        Self { client }
    }
}

impl RateLimiterFactory for RemoteFactory {
    fn create(&self, key: &str, window: SlidingWindow) -> Arc<dyn RateLimiter> {
        Arc::new(RemoteRateLimiter::new(
            format!("{key}/{}ms", window.time_window_ms),
            window,
            self.client.clone(),
        ))
    }
}

#[derive(Clone)]
pub struct RateLimiterRegistry {
    factories: HashMap<String, Arc<dyn RateLimiterFactory>>,
}

impl RateLimiterRegistry {
    pub fn with_defaults() -> Self {
        let mut factories: HashMap<String, Arc<dyn RateLimiterFactory>> = HashMap::new();
        factories.insert(REALIZE_SLIDING_WINDOW.to_string(), Arc::new(SlidingWindowFactory));
        factories.insert(REALIZE_TOKEN_BUCKET.to_string(), Arc::new(TokenBucketFactory));
        Self { factories }
    }

    pub fn register(&mut self, realize_type: impl Into<String>, factory: Arc<dyn RateLimiterFactory>) {
        self.factories.insert(realize_type.into(), factory);
    }

    pub fn with_remote(mut self, client: Arc<dyn QuotaClient>) -> Self {
        self.register(REALIZE_REMOTE, Arc::new(RemoteFactory::new(client)));
        self
    }

    /// Builds the limiter for `policy`; `None` when it declares no window.
    pub fn build(&self, policy: &RateLimitPolicy) -> Option<Arc<dyn RateLimiter>> {
        let realize_type = policy
            .realize_type
            .as_deref()
            .unwrap_or(REALIZE_SLIDING_WINDOW);
        let factory = match self.factories.get(realize_type) {
            Some(factory) => factory.clone(),
            None => {
                tracing::warn!(
                    target: "governance",
                    policy = %policy.name,
                    realize_type = %realize_type,
                    "rate_limiter_type_unknown"
                );
                Arc::new(SlidingWindowFactory)
            }
        };

        let key = policy_key(policy);
        let mut members: Vec<_> = policy
            .sliding_windows
            .iter()
            .map(|window| factory.create(&key, *window))
            .collect();
        match members.len() {
            0 => None,
            1 => members.pop(),
            _ => Some(Arc::new(GroupRateLimiter::new(members))),
        }
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn policy_key(policy: &RateLimitPolicy) -> String {
    policy
        .uri
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| policy.name.clone())
}

struct CachedLimiter {
    policy: RateLimitPolicy,
    limiter: Option<Arc<dyn RateLimiter>>,
}

/// One limiter per policy identity, rebuilt when the policy changes.
pub struct RateLimiterCache {
    registry: RateLimiterRegistry,
    limiters: DashMap<String, CachedLimiter>,
}

impl RateLimiterCache {
    pub fn new(registry: RateLimiterRegistry) -> Self {
        Self {
            registry,
            limiters: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    pub fn limiter(&self, policy: &RateLimitPolicy) -> Option<Arc<dyn RateLimiter>> {
        let mut entry = self
            .limiters
            .entry(policy_key(policy))
            .or_insert_with(|| CachedLimiter {
                policy: policy.clone(),
                limiter: self.registry.build(policy),
            });
        if entry.policy != *policy {
            if let Some(stale) = entry.limiter.take() {
                stale.close();
            }
            *entry = CachedLimiter {
                policy: policy.clone(),
                limiter: self.registry.build(policy),
            };
            tracing::debug!(target: "governance", policy = %policy.name, "rate_limiter_rebuilt");
        }
        entry.limiter.clone()
    }

    /// Evaluates every policy whose conditions match; the first denial wins.
    pub async fn evaluate(
        &self,
        policies: &[RateLimitPolicy],
        request: &ServiceRequest,
        default_timeout: Duration,
    ) -> Permission {
        for policy in policies {
            if !conditions_match(&policy.conditions, request) {
                continue;
            }
            let Some(limiter) = self.limiter(policy) else {
                continue;
            };
            let timeout = policy
                .max_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout);
            if !limiter.acquire(1, timeout).await {
                tracing::debug!(
                    target: "governance",
                    policy = %policy.name,
                    service = %request.service,
                    "rate_limited"
                );
                return Permission::failure_with_code(
                    CODE_RATE_LIMIT,
                    format!("rate limit '{}' exceeded", policy.name),
                );
            }
        }
        Permission::success()
    }

    pub fn close_all(&self) {
        for entry in self.limiters.iter() {
            if let Some(limiter) = entry.limiter.as_ref() {
                limiter.close();
            }
        }
        self.limiters.clear();
    }
}
