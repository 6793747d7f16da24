pub mod circuit_break;
pub mod concurrency;
pub mod load_limit;
pub mod permission;
pub mod rate_limit;

pub use circuit_break::{
    BreakerPass, CallOutcome, CircuitBreaker, CircuitBreakerManager, CircuitState,
};
pub use concurrency::{ConcurrencyLease, ConcurrencyLimiter};
pub use load_limit::{LoadLimiter, LoadSample, LoadSampler, SystemLoadSampler};
pub use permission::Permission;
pub use rate_limit::{
    LimiterError, QuotaClient, RateLimiter, RateLimiterCache, RateLimiterFactory,
    RateLimiterRegistry,
};
