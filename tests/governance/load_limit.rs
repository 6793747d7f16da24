use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use livegov::{
    governance::{LoadLimiter, LoadSample, LoadSampler, permission::CODE_LOAD_LIMIT},
    policy::model::LoadLimitPolicy,
    request::ServiceRequest,
};

struct CountingSampler {
    sample: LoadSample,
    calls: AtomicUsize,
}

impl LoadSampler for CountingSampler {
    fn sample(&self) -> LoadSample {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sample
    }
}

fn sampler(cpu_usage: f32, load_per_core: f64) -> Arc<CountingSampler> {
    Arc::new(CountingSampler {
        sample: LoadSample {
            cpu_usage,
            load_per_core,
        },
        calls: AtomicUsize::new(0),
    })
}

fn policy(max_active: Option<u64>, cpu_usage: Option<u32>, load_usage: Option<u32>) -> LoadLimitPolicy {
    LoadLimitPolicy {
        name: "load".to_string(),
        id: None,
        uri: None,
        max_active,
        cpu_usage,
        load_usage,
        conditions: vec![],
    }
}

#[test]
fn given_active_limit_only_when_evaluated_then_host_is_never_sampled() {
    let sampler = sampler(99.0, 400.0);
    let limiter = LoadLimiter::new(sampler.clone());
    let policies = [policy(Some(2), None, None)];
    let request = ServiceRequest::new("svc");

    assert!(limiter.evaluate(&policies, &request, 1).is_success());
    let denied = limiter.evaluate(&policies, &request, 2);

    assert_eq!(denied.error_code, CODE_LOAD_LIMIT);
    assert_eq!(sampler.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn given_busy_cpu_when_evaluated_then_call_is_rejected() {
    let limiter = LoadLimiter::new(sampler(95.0, 10.0));
    let permission = limiter.evaluate(&[policy(None, Some(90), None)], &ServiceRequest::new("svc"), 0);
    assert_eq!(permission.error_code, CODE_LOAD_LIMIT);
}

#[test]
fn given_high_load_average_when_evaluated_then_call_is_rejected() {
    let limiter = LoadLimiter::new(sampler(10.0, 180.0));
    let request = ServiceRequest::new("svc");

    assert!(limiter.evaluate(&[policy(None, None, Some(200))], &request, 0).is_success());
    assert!(!limiter.evaluate(&[policy(None, None, Some(150))], &request, 0).is_success());
}

#[test]
fn given_several_policies_when_evaluated_then_host_is_sampled_once() {
    let sampler = sampler(10.0, 10.0);
    let limiter = LoadLimiter::new(sampler.clone());
    let policies = [policy(None, Some(90), None), policy(None, None, Some(90))];

    assert!(limiter.evaluate(&policies, &ServiceRequest::new("svc"), 0).is_success());
    assert_eq!(sampler.calls.load(Ordering::SeqCst), 1);
}
