use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    counter::{Counter, CounterCleaner, CounterManager, EndpointSupplier, FlyingCounter},
    governance::{
        BreakerPass, CallOutcome, CircuitBreakerManager, ConcurrencyLease, ConcurrencyLimiter,
        LoadLimiter, LoadSampler, Permission, RateLimiterCache, RateLimiterRegistry,
        SystemLoadSampler, permission::CODE_DRAINING,
    },
    live::{LaneMetadata, LaneResolver, LiveMetadata, Location, UnitRouter},
    policy::{
        GovernancePolicy, PolicySupplier, ServicePolicy,
        id::{KEY_METHOD, PolicyId},
        model::{CircuitBreakLevel, UnitPolicy},
    },
    request::{Endpoint, ServiceRequest},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouteOutcome {
    pub live: Option<LiveMetadata>,
    pub lane: Option<LaneMetadata>,
}

/// In-flight accounting shared between the engine and outstanding calls.
#[derive(Debug, Default)]
struct InFlight {
    counter: FlyingCounter,
    draining: AtomicBool,
}

impl InFlight {
    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    fn enter(self: &Arc<Self>) -> Flight {
        self.counter.increment();
        Flight {
            in_flight: self.clone(),
            passes: Vec::new(),
        }
    }

    fn leave(&self) {
        if self.counter.decrement() <= 0 && self.is_draining() {
            self.counter.done();
        }
    }
}

/// One call counted in flight. Dropping it, including when `evaluate` is
/// cancelled mid-await, returns unused breaker trials and the in-flight slot.
struct Flight {
    in_flight: Arc<InFlight>,
    passes: Vec<BreakerPass>,
}

impl Drop for Flight {
    fn drop(&mut self) {
        self.passes.clear();
        self.in_flight.leave();
    }
}

/// Proof of admission; hand it back through [`GovernanceEngine::complete`].
///
/// A ticket dropped without completion counts as a failed call and frees
/// everything it holds.
pub struct CallTicket {
    counter: Arc<Counter>,
    leases: Vec<ConcurrencyLease>,
    started: Instant,
    completed: bool,
    flight: Flight,
}

impl CallTicket {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for CallTicket {
    fn drop(&mut self) {
        if !self.completed {
            self.counter.end(self.started.elapsed(), false);
            tracing::debug!(target: "engine", "call_abandoned");
        }
    }
}

impl fmt::Debug for CallTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTicket")
            .field("breakers", &self.flight.passes.len())
            .field("leases", &self.leases.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Decision {
    pub permission: Permission,
    pub route: RouteOutcome,
    /// Present only when the call was admitted.
    pub ticket: Option<CallTicket>,
}

impl Decision {
    fn denied(permission: Permission, route: RouteOutcome) -> Self {
        Self {
            permission,
            route,
            ticket: None,
        }
    }

    pub fn is_admitted(&self) -> bool {
        self.permission.success
    }
}

fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn request_uri(request: &ServiceRequest) -> String {
    let uri = PolicyId::service(&request.service, &request.path);
    if request.method.is_empty() {
        uri.to_string()
    } else {
        uri.with_parameter(KEY_METHOD, &request.method).to_string()
    }
}

/// Per-process entry point: routes calls, admits them, and tracks them until completion.
pub struct GovernanceEngine {
    config: EngineConfig,
    location: Location,
    supplier: Arc<dyn PolicySupplier>,
    router: Arc<UnitRouter>,
    counters: Arc<CounterManager>,
    breakers: CircuitBreakerManager,
    rate_limiters: RateLimiterCache,
    concurrency: ConcurrencyLimiter,
    load: LoadLimiter,
    in_flight: Arc<InFlight>,
    shutdown: CancellationToken,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl GovernanceEngine {
    pub fn new(
        config: EngineConfig,
        location: Location,
        supplier: Arc<dyn PolicySupplier>,
        router: Arc<UnitRouter>,
    ) -> Self {
        Self {
            config,
            location,
            supplier,
            router,
            counters: Arc::new(CounterManager::new()),
            breakers: CircuitBreakerManager::new(),
            rate_limiters: RateLimiterCache::new(RateLimiterRegistry::with_defaults()),
            concurrency: ConcurrencyLimiter::new(),
            load: LoadLimiter::new(Arc::new(SystemLoadSampler::new())),
            in_flight: Arc::new(InFlight::default()),
            shutdown: CancellationToken::new(),
            cleaner: Mutex::new(None),
        }
    }

    pub fn with_rate_limiters(mut self, registry: RateLimiterRegistry) -> Self {
        self.rate_limiters = RateLimiterCache::new(registry);
        self
    }

    pub fn with_load_sampler(mut self, sampler: Arc<dyn LoadSampler>) -> Self {
        self.load = LoadLimiter::new(sampler);
        self
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn counters(&self) -> &Arc<CounterManager> {
        &self.counters
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    pub fn flying(&self) -> &FlyingCounter {
        &self.in_flight.counter
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.is_draining()
    }

    fn resolve<'a>(
        snapshot: &'a GovernancePolicy,
        request: &ServiceRequest,
    ) -> Option<&'a ServicePolicy> {
        snapshot.service_policy(
            &request.service,
            request.group_or_default(),
            &request.path,
            &request.method,
        )
    }

    fn route_with(
        &self,
        snapshot: &GovernancePolicy,
        policy: Option<&ServicePolicy>,
        request: &ServiceRequest,
    ) -> RouteOutcome {
        let live = policy
            .and_then(|policy| policy.live_policy.as_ref())
            .filter(|live| live.unit_policy != Some(UnitPolicy::None))
            .and_then(|live| {
                let space_id = live
                    .live_space_id
                    .as_deref()
                    .or(self.location.live_space_id.as_deref())?;
                let space = snapshot.live_space(space_id)?;
                Some(self.router.route(space, live, request, &self.location))
            });

        let lane_policy = policy.and_then(|policy| policy.lane_policies.first());
        let lane = match lane_policy {
            Some(lane_policy) => snapshot.lane_space(&lane_policy.lane_space_id).map(|space| {
                LaneResolver::resolve(space, request, &self.location, Some(&lane_policy.redirections))
            }),
            None => self
                .location
                .lane_space_id
                .as_deref()
                .and_then(|id| snapshot.lane_space(id))
                .map(|space| LaneResolver::resolve(space, request, &self.location, None)),
        };

        RouteOutcome { live, lane }
    }

    /// Resolves unit and lane for `request` without admitting it.
    pub fn route(&self, request: &ServiceRequest) -> RouteOutcome {
        let snapshot = self.supplier.snapshot();
        let policy = Self::resolve(&snapshot, request);
        self.route_with(&snapshot, policy, request)
    }

    /// Routes and admits a call to `endpoint_id`.
    ///
    /// Circuit breakers, concurrency, load and rate limits are checked in that
    /// order; the first denial wins and releases whatever was already taken.
    pub async fn evaluate(&self, request: &ServiceRequest, endpoint_id: &str) -> Decision {
        let mut flight = self.in_flight.enter();
        if self.is_draining() {
            return Decision::denied(
                Permission::failure_with_code(CODE_DRAINING, "engine is draining"),
                RouteOutcome::default(),
            );
        }

        let snapshot = self.supplier.snapshot();
        let policy = Self::resolve(&snapshot, request);
        let route = self.route_with(&snapshot, policy, request);
        let Some(policy) = policy else {
            return Decision {
                permission: Permission::success(),
                route,
                ticket: Some(self.admit(request, endpoint_id, flight, Vec::new())),
            };
        };

        match self
            .breakers
            .try_acquire(&policy.circuit_break_policies, request, Some(endpoint_id))
        {
            Ok(passes) => flight.passes = passes,
            Err(permission) => return Self::deny(permission, route),
        }

        let leases = match self
            .concurrency
            .acquire(
                &policy.concurrency_limit_policies,
                request,
                Duration::from_millis(self.config.concurrency_timeout_ms),
            )
            .await
        {
            Ok(leases) => leases,
            Err(permission) => return Self::deny(permission, route),
        };

        let active = self
            .counters
            .get_counter(&request.service, request.group_or_default())
            .and_then(|service| service.get_counter(endpoint_id))
            .map(|endpoint| endpoint.active())
            .unwrap_or_default();
        let permission = self
            .load
            .evaluate(&policy.load_limit_policies, request, active);
        if !permission.success {
            return Self::deny(permission, route);
        }

        let permission = self
            .rate_limiters
            .evaluate(
                &policy.rate_limit_policies,
                request,
                Duration::from_millis(self.config.rate_limit_timeout_ms),
            )
            .await;
        if !permission.success {
            return Self::deny(permission, route);
        }

        Decision {
            permission,
            route,
            ticket: Some(self.admit(request, endpoint_id, flight, leases)),
        }
    }

    fn admit(
        &self,
        request: &ServiceRequest,
        endpoint_id: &str,
        flight: Flight,
        leases: Vec<ConcurrencyLease>,
    ) -> CallTicket {
        let endpoint = self
            .counters
            .get_or_create_counter(&request.service, request.group_or_default())
            .get_or_create_counter(endpoint_id);
        endpoint.set_access_time(now_millis());
        let counter = endpoint.get_or_create_counter(&request_uri(request));
        counter.begin();
        CallTicket {
            counter,
            leases,
            started: Instant::now(),
            completed: false,
            flight,
        }
    }

    /// Everything taken so far is freed when the caller's `Flight` and leases drop.
    fn deny(permission: Permission, route: RouteOutcome) -> Decision {
        tracing::debug!(
            target: "engine",
            error_code = permission.error_code,
            message = ?permission.message,
            "call_denied"
        );
        Decision::denied(permission, route)
    }

    /// Records the outcome of an admitted call.
    pub fn complete(&self, mut ticket: CallTicket, outcome: &CallOutcome) {
        ticket.completed = true;
        ticket.counter.end(outcome.elapsed, outcome.is_success());
        for pass in ticket.flight.passes.drain(..) {
            pass.record(outcome);
        }
    }

    /// Endpoints eligible for `request`, after instance-level outlier ejection.
    pub fn filter_endpoints(&self, request: &ServiceRequest, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        let snapshot = self.supplier.snapshot();
        let Some(policy) = Self::resolve(&snapshot, request) else {
            return endpoints.into_iter().filter(|e| e.healthy).collect();
        };
        let mut endpoints: Vec<Endpoint> = endpoints.into_iter().filter(|e| e.healthy).collect();
        for breaker_policy in policy
            .circuit_break_policies
            .iter()
            .filter(|p| p.level == CircuitBreakLevel::Instance)
        {
            endpoints = self.breakers.filter_endpoints(breaker_policy, endpoints);
        }
        endpoints
    }

    /// Stops admitting calls and waits for the ones in flight, up to `timeout`.
    ///
    /// Returns whether every call completed in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let flying = self.flying();
        self.in_flight.draining.store(true, Ordering::Release);
        if flying.count() <= 0 {
            flying.done();
        }
        let drained = tokio::time::timeout(timeout, flying.wait_done())
            .await
            .is_ok();
        tracing::info!(
            target: "engine",
            drained = drained,
            in_flight = flying.count(),
            "engine_drained"
        );
        drained
    }

    /// Starts the background counter cleaner; `false` if it is already running.
    pub fn start_cleaner(&self, supplier: Arc<dyn EndpointSupplier>) -> bool {
        let mut guard = self.cleaner.lock();
        if guard.is_some() {
            return false;
        }
        let cleaner = CounterCleaner::new(
            self.counters.clone(),
            supplier,
            Duration::from_millis(self.config.cleanup_interval_ms),
        );
        *guard = Some(cleaner.spawn(self.shutdown.child_token()));
        true
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.cleaner.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(target: "engine", error = %err, "counter_cleaner_join_failed");
        }
        self.rate_limiters.close_all();
    }
}
