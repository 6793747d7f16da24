use std::{collections::BTreeSet, time::Duration};

use livegov::{
    governance::{CallOutcome, CircuitBreaker, CircuitBreakerManager, CircuitState, permission},
    policy::model::{CircuitBreakLevel, CircuitBreakPolicy},
    request::{Endpoint, ServiceRequest},
};

fn trip_fast(level: CircuitBreakLevel) -> CircuitBreakPolicy {
    CircuitBreakPolicy {
        level,
        sliding_window_size: 2,
        minimum_calls: 2,
        failure_rate_threshold: 50.0,
        wait_duration_in_open_ms: 60_000,
        allowed_calls_in_half_open: 1,
        ..CircuitBreakPolicy::new("trip-fast")
    }
}

fn fail(breaker: &CircuitBreaker) {
    breaker.on_result(&CallOutcome::failure(Duration::from_millis(1), "503"));
}

#[test]
fn given_slow_calls_over_threshold_when_recorded_then_breaker_opens() {
    let breaker = CircuitBreaker::new(
        "slow",
        CircuitBreakPolicy {
            minimum_calls: 2,
            failure_rate_threshold: 100.0,
            slow_call_duration_ms: Some(100),
            slow_call_rate_threshold: Some(50.0),
            ..CircuitBreakPolicy::new("slow")
        },
    );

    breaker.on_result(&CallOutcome::success(Duration::from_millis(5)));
    assert_eq!(breaker.state(), CircuitState::Closed);
    breaker.on_result(&CallOutcome::success(Duration::from_millis(250)));

    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.try_acquire());
}

#[test]
fn given_listed_error_codes_when_other_codes_fail_then_breaker_stays_closed() {
    let breaker = CircuitBreaker::new(
        "codes",
        CircuitBreakPolicy {
            error_codes: BTreeSet::from(["503".to_string()]),
            ..trip_fast(CircuitBreakLevel::Service)
        },
    );

    breaker.on_result(&CallOutcome::failure(Duration::from_millis(1), "404"));
    breaker.on_result(&CallOutcome::failure(Duration::from_millis(1), "404"));
    assert_eq!(breaker.state(), CircuitState::Closed);

    fail(&breaker);
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn given_open_breaker_when_wait_elapses_then_single_trial_decides() {
    let breaker = CircuitBreaker::new(
        "trial",
        CircuitBreakPolicy {
            wait_duration_in_open_ms: 20,
            ..trip_fast(CircuitBreakLevel::Service)
        },
    );
    fail(&breaker);
    fail(&breaker);
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert!(breaker.try_acquire());
    assert!(!breaker.try_acquire(), "only one trial is allowed");

    breaker.release_trial();
    assert!(breaker.try_acquire(), "released trial can be reissued");

    fail(&breaker);
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn given_api_level_policy_when_one_api_trips_then_other_apis_pass() {
    let manager = CircuitBreakerManager::new();
    let policies = vec![trip_fast(CircuitBreakLevel::Api)];
    let create = ServiceRequest::new("order-service")
        .with_path("/orders")
        .with_method("POST");
    let list = ServiceRequest::new("order-service")
        .with_path("/orders")
        .with_method("GET");

    let passes = manager
        .try_acquire(&policies, &create, None)
        .expect("closed breaker admits");
    for pass in &passes {
        assert!(!pass.is_trial());
        fail(pass.breaker());
        fail(pass.breaker());
    }

    let denied = manager
        .try_acquire(&policies, &create, None)
        .expect_err("open breaker denies");
    assert_eq!(denied.error_code, permission::CODE_CIRCUIT_BREAK);
    assert!(manager.try_acquire(&policies, &list, None).is_ok());
    assert_eq!(manager.len(), 2);
}

#[tokio::test]
async fn given_later_breaker_open_when_acquired_then_earlier_trial_is_returned() {
    let manager = CircuitBreakerManager::new();
    let recovering = CircuitBreakPolicy {
        wait_duration_in_open_ms: 20,
        ..trip_fast(CircuitBreakLevel::Service)
    };
    let blocking = CircuitBreakPolicy {
        name: "blocking".to_string(),
        ..trip_fast(CircuitBreakLevel::Service)
    };
    let request = ServiceRequest::new("order-service");
    for policy in [&recovering, &blocking] {
        let breaker = manager.breaker(policy, "");
        fail(&breaker);
        fail(&breaker);
    }
    tokio::time::sleep(Duration::from_millis(40)).await;

    let denied = manager
        .try_acquire(&[recovering.clone(), blocking], &request, None)
        .expect_err("second breaker is still open");
    assert_eq!(denied.error_code, permission::CODE_CIRCUIT_BREAK);

    let passes = manager
        .try_acquire(std::slice::from_ref(&recovering), &request, None)
        .expect("the single trial was handed back");
    assert!(passes[0].is_trial());
}

#[tokio::test]
async fn given_trial_from_earlier_half_open_period_when_released_then_new_period_is_untouched() {
    let breaker = std::sync::Arc::new(CircuitBreaker::new(
        "epoch",
        CircuitBreakPolicy {
            wait_duration_in_open_ms: 20,
            ..trip_fast(CircuitBreakLevel::Service)
        },
    ));
    fail(&breaker);
    fail(&breaker);
    tokio::time::sleep(Duration::from_millis(40)).await;

    let stale = breaker.pass().expect("trial issued");
    fail(&breaker);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(breaker.try_acquire(), "new half-open period issues its trial");

    drop(stale);

    assert!(!breaker.try_acquire(), "stale release must not free another trial");
}

#[test]
fn given_new_policy_version_when_breaker_requested_then_state_is_reset() {
    let manager = CircuitBreakerManager::new();
    let mut policy = trip_fast(CircuitBreakLevel::Service);
    let breaker = manager.breaker(&policy, "");
    fail(&breaker);
    fail(&breaker);
    assert_eq!(manager.breaker(&policy, "").state(), CircuitState::Open);

    policy.version += 1;

    assert_eq!(manager.breaker(&policy, "").state(), CircuitState::Closed);
}

#[test]
fn given_threshold_changed_under_same_version_when_breaker_requested_then_new_policy_applies() {
    let manager = CircuitBreakerManager::new();
    let policy = trip_fast(CircuitBreakLevel::Service);
    let breaker = manager.breaker(&policy, "");
    fail(&breaker);
    fail(&breaker);

    let tolerant = CircuitBreakPolicy {
        failure_rate_threshold: 100.0,
        minimum_calls: 10,
        ..policy.clone()
    };
    let rebuilt = manager.breaker(&tolerant, "");

    assert_eq!(rebuilt.state(), CircuitState::Closed);
    assert_eq!(rebuilt.policy().minimum_calls, 10);
    assert_eq!(manager.breaker(&tolerant, "").state(), CircuitState::Closed);
}

fn endpoints(count: usize) -> Vec<Endpoint> {
    (0..count)
        .map(|port| Endpoint::new("10.0.0.1", 8000 + port as u16))
        .collect()
}

fn open_instances(manager: &CircuitBreakerManager, policy: &CircuitBreakPolicy, ids: &[Endpoint]) {
    for endpoint in ids {
        let breaker = manager.breaker(policy, &endpoint.id);
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}

#[test]
fn given_open_instances_when_filtering_then_ejection_is_capped_by_outlier_share() {
    let manager = CircuitBreakerManager::new();
    let policy = trip_fast(CircuitBreakLevel::Instance);
    let all = endpoints(4);
    open_instances(&manager, &policy, &all[..3]);

    let kept = manager.filter_endpoints(&policy, all.clone());

    assert_eq!(kept.len(), 2, "at most half of four endpoints may be ejected");
    assert!(kept.contains(&all[3]));
}

#[test]
fn given_single_healthy_endpoint_when_its_breaker_is_open_then_protect_mode_keeps_it() {
    let manager = CircuitBreakerManager::new();
    let policy = trip_fast(CircuitBreakLevel::Instance);
    let mut all = endpoints(2);
    all[1] = all[1].clone().with_healthy(false);
    open_instances(&manager, &policy, &all[..1]);

    let kept = manager.filter_endpoints(&policy, all.clone());

    assert_eq!(kept, vec![all[0].clone()]);
}
