use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    governance::permission::{CODE_CIRCUIT_BREAK, Permission},
    policy::model::{CircuitBreakLevel, CircuitBreakPolicy},
    request::{Endpoint, ServiceRequest},
};

pub const DEFAULT_OUTLIER_MAX_PERCENT: i32 = 50;

impl CircuitBreakPolicy {
    /// `outlier_max_percent`, with non-positive values replaced by the default.
    pub fn effective_outlier_max_percent(&self) -> i32 {
        if self.outlier_max_percent > 0 {
            self.outlier_max_percent
        } else {
            DEFAULT_OUTLIER_MAX_PERCENT
        }
    }

    /// Whether outlier ejection must be suppressed for a population of `total` endpoints.
    pub fn is_protect_mode(&self, total: usize) -> bool {
        (total as i64).saturating_mul(i64::from(self.effective_outlier_max_percent())) < 100
    }

    /// How many of `total` endpoints may be ejected at once.
    pub fn max_ejected(&self, total: usize) -> usize {
        let percent = self.effective_outlier_max_percent().clamp(0, 100) as usize;
        total * percent / 100
    }

    fn counts_as_failure(&self, outcome: &CallOutcome) -> bool {
        match outcome.error_code.as_deref() {
            None => false,
            Some(code) => self.error_codes.is_empty() || self.error_codes.contains(code),
        }
    }

    fn is_slow(&self, outcome: &CallOutcome) -> bool {
        self.slow_call_duration_ms
            .is_some_and(|threshold| outcome.elapsed >= Duration::from_millis(threshold))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub elapsed: Duration,
    /// `None` for a successful call.
    pub error_code: Option<String>,
}

impl CallOutcome {
    pub fn success(elapsed: Duration) -> Self {
        Self {
            elapsed,
            error_code: None,
        }
    }

    pub fn failure(elapsed: Duration, error_code: impl Into<String>) -> Self {
        Self {
            elapsed,
            error_code: Some(error_code.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    failure: bool,
    slow: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: VecDeque<Sample>,
    open_until: Option<Instant>,
    trials_issued: u32,
    trials: Vec<Sample>,
    /// Bumped on every transition; trials are only returned to the epoch that issued them.
    epoch: u64,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            window: VecDeque::new(),
            open_until: None,
            trials_issued: 0,
            trials: Vec::new(),
            epoch: 0,
        }
    }
}

/// Admission through one breaker.
///
/// A pass taken in half-open holds one trial slot until the call's outcome is
/// recorded; dropping or releasing the pass hands the slot back.
#[derive(Debug)]
pub struct BreakerPass {
    breaker: Arc<CircuitBreaker>,
    trial_epoch: Option<u64>,
}

impl BreakerPass {
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_trial(&self) -> bool {
        self.trial_epoch.is_some()
    }

    pub fn record(mut self, outcome: &CallOutcome) {
        self.trial_epoch = None;
        self.breaker.on_result(outcome);
    }
}

impl Drop for BreakerPass {
    fn drop(&mut self) {
        if let Some(epoch) = self.trial_epoch.take() {
            self.breaker.release_trial_at(epoch);
        }
    }
}

/// Count-based breaker over the most recent calls of one resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    policy: CircuitBreakPolicy,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, policy: CircuitBreakPolicy) -> Self {
        Self {
            key: key.into(),
            policy,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> &CircuitBreakPolicy {
        &self.policy
    }

    pub fn state(&self) -> CircuitState {
        let mut guard = self.state.lock();
        self.refresh(&mut guard, Instant::now());
        guard.state
    }

    /// Admits a call; in half-open only `allowed_calls_in_half_open` trials pass.
    pub fn try_acquire(&self) -> bool {
        self.admit().is_some()
    }

    /// `None` when denied, `Some(Some(epoch))` when a half-open trial was taken.
    fn admit(&self) -> Option<Option<u64>> {
        let mut guard = self.state.lock();
        self.refresh(&mut guard, Instant::now());
        match guard.state {
            CircuitState::Closed => Some(None),
            CircuitState::Open => None,
            CircuitState::HalfOpen => {
                if guard.trials_issued < self.policy.allowed_calls_in_half_open.max(1) {
                    guard.trials_issued += 1;
                    Some(Some(guard.epoch))
                } else {
                    None
                }
            }
        }
    }

    /// Takes a pass through this breaker, or `None` when it denies the call.
    pub fn pass(self: &Arc<Self>) -> Option<BreakerPass> {
        self.admit().map(|trial_epoch| BreakerPass {
            breaker: self.clone(),
            trial_epoch,
        })
    }

    /// Gives back one trial of the current half-open period.
    pub fn release_trial(&self) {
        let epoch = self.state.lock().epoch;
        self.release_trial_at(epoch);
    }

    fn release_trial_at(&self, epoch: u64) {
        let mut guard = self.state.lock();
        if guard.state == CircuitState::HalfOpen && guard.epoch == epoch {
            guard.trials_issued = guard.trials_issued.saturating_sub(1);
        }
    }

    pub fn on_result(&self, outcome: &CallOutcome) {
        let sample = Sample {
            failure: self.policy.counts_as_failure(outcome),
            slow: self.policy.is_slow(outcome),
        };

        let mut guard = self.state.lock();
        self.refresh(&mut guard, Instant::now());
        match guard.state {
            CircuitState::Closed => {
                guard.window.push_back(sample);
                while guard.window.len() > self.policy.sliding_window_size.max(1) as usize {
                    guard.window.pop_front();
                }
                if guard.window.len() >= self.policy.minimum_calls.max(1) as usize
                    && self.exceeds_thresholds(guard.window.iter())
                {
                    self.transition(&mut guard, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                guard.trials.push(sample);
                if guard.trials.len() >= self.policy.allowed_calls_in_half_open.max(1) as usize {
                    let next = if self.exceeds_thresholds(guard.trials.iter()) {
                        CircuitState::Open
                    } else {
                        CircuitState::Closed
                    };
                    self.transition(&mut guard, next);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn exceeds_thresholds<'a>(&self, samples: impl Iterator<Item = &'a Sample>) -> bool {
        let (total, failures, slow) = samples.fold((0usize, 0usize, 0usize), |acc, sample| {
            (
                acc.0 + 1,
                acc.1 + usize::from(sample.failure),
                acc.2 + usize::from(sample.slow),
            )
        });
        if total == 0 {
            return false;
        }
        let failure_rate = failures as f64 * 100.0 / total as f64;
        let slow_rate = slow as f64 * 100.0 / total as f64;
        failure_rate >= self.policy.failure_rate_threshold
            || self
                .policy
                .slow_call_rate_threshold
                .is_some_and(|threshold| slow_rate >= threshold)
    }

    fn refresh(&self, state: &mut BreakerState, now: Instant) {
        if state.state == CircuitState::Open
            && state.open_until.is_some_and(|open_until| now >= open_until)
        {
            self.transition(state, CircuitState::HalfOpen);
        }
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState) {
        let previous = state.state;
        state.state = next;
        state.epoch += 1;
        state.trials_issued = 0;
        state.trials.clear();
        match next {
            CircuitState::Open => {
                state.open_until = Some(
                    Instant::now() + Duration::from_millis(self.policy.wait_duration_in_open_ms.max(1)),
                );
            }
            CircuitState::Closed => {
                state.open_until = None;
                state.window.clear();
            }
            CircuitState::HalfOpen => state.open_until = None,
        }
        tracing::info!(
            target: "governance",
            breaker = %self.key,
            policy = %self.policy.name,
            from = ?previous,
            to = ?next,
            "circuit_transition"
        );
    }
}

/// Breakers keyed by policy and the resource the policy's level protects.
#[derive(Default)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    fn breaker_key(policy: &CircuitBreakPolicy, resource: &str) -> String {
        let owner = policy
            .uri
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| policy.name.clone());
        format!("{owner}#{resource}")
    }

    fn resource(
        policy: &CircuitBreakPolicy,
        request: &ServiceRequest,
        endpoint_id: Option<&str>,
    ) -> Option<String> {
        match policy.level {
            CircuitBreakLevel::Service => Some(String::new()),
            CircuitBreakLevel::Api => Some(format!("{}:{}", request.path, request.method)),
            CircuitBreakLevel::Instance => endpoint_id.map(str::to_string),
        }
    }

    /// Returns the breaker for `policy` and `resource`, rebuilding it when the policy changed.
    pub fn breaker(&self, policy: &CircuitBreakPolicy, resource: &str) -> Arc<CircuitBreaker> {
        let key = Self::breaker_key(policy, resource);
        match self.breakers.entry(key) {
            Entry::Occupied(mut entry) if entry.get().policy != *policy => {
                let breaker = Arc::new(CircuitBreaker::new(entry.key().clone(), policy.clone()));
                entry.insert(breaker.clone());
                breaker
            }
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let breaker = Arc::new(CircuitBreaker::new(entry.key().clone(), policy.clone()));
                entry.insert(breaker.clone());
                breaker
            }
        }
    }

    /// Admits the call through every applicable breaker; the first open one denies it
    /// and the passes already taken are dropped, returning their trial slots.
    pub fn try_acquire(
        &self,
        policies: &[CircuitBreakPolicy],
        request: &ServiceRequest,
        endpoint_id: Option<&str>,
    ) -> Result<Vec<BreakerPass>, Permission> {
        let mut acquired: Vec<BreakerPass> = Vec::with_capacity(policies.len());
        for policy in policies {
            let Some(resource) = Self::resource(policy, request, endpoint_id) else {
                continue;
            };
            let breaker = self.breaker(policy, &resource);
            let Some(pass) = breaker.pass() else {
                drop(acquired);
                tracing::debug!(
                    target: "governance",
                    breaker = %breaker.key(),
                    service = %request.service,
                    "circuit_rejected"
                );
                return Err(Permission::failure_with_code(
                    CODE_CIRCUIT_BREAK,
                    format!("circuit breaker '{}' is open", policy.name),
                ));
            };
            acquired.push(pass);
        }
        Ok(acquired)
    }

    /// Drops unhealthy endpoints and ejects instances whose breaker is open.
    ///
    /// Ejection is skipped entirely in protect mode and never removes more than
    /// the policy's outlier share of the healthy population.
    pub fn filter_endpoints(
        &self,
        policy: &CircuitBreakPolicy,
        endpoints: Vec<Endpoint>,
    ) -> Vec<Endpoint> {
        let healthy: Vec<Endpoint> = endpoints.into_iter().filter(|e| e.healthy).collect();
        let total = healthy.len();
        if policy.level != CircuitBreakLevel::Instance || policy.is_protect_mode(total) {
            return healthy;
        }

        let mut budget = policy.max_ejected(total);
        let mut kept = Vec::with_capacity(total);
        for endpoint in healthy {
            let key = Self::breaker_key(policy, &endpoint.id);
            let open = self
                .breakers
                .get(&key)
                .map(|breaker| breaker.clone())
                .is_some_and(|breaker| {
                    breaker.policy == *policy && breaker.state() == CircuitState::Open
                });
            if open && budget > 0 {
                budget -= 1;
                tracing::debug!(
                    target: "governance",
                    endpoint = %endpoint.id,
                    policy = %policy.name,
                    "endpoint_ejected"
                );
                continue;
            }
            kept.push(endpoint);
        }
        kept
    }
}
