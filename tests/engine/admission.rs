use std::time::Duration;

use livegov::{
    config::EngineConfig,
    governance::{
        CallOutcome,
        permission::{CODE_CIRCUIT_BREAK, CODE_CONCURRENCY_LIMIT, CODE_RATE_LIMIT},
    },
    policy::GovernancePolicy,
    request::{Endpoint, ServiceRequest},
};

use crate::{engine, engine_and_supplier};

const ENDPOINT: &str = "10.0.0.1:8080";

fn service(policy: &str) -> String {
    format!(
        r#"{{
  version: 1,
  services: [{{ name: "order-service", groups: [{{ name: "default", default_group: true, service_policy: {policy} }}] }}],
}}"#
    )
}

fn request() -> ServiceRequest {
    ServiceRequest::new("order-service")
        .with_path("/orders")
        .with_method("POST")
}

#[tokio::test]
async fn given_no_policy_when_evaluated_then_call_is_admitted_and_counted() {
    let engine = engine("{ version: 1 }");

    let decision = engine.evaluate(&request(), ENDPOINT).await;
    assert!(decision.is_admitted());
    assert_eq!(engine.flying().count(), 1);

    engine.complete(
        decision.ticket.expect("admitted calls carry a ticket"),
        &CallOutcome::success(Duration::from_millis(12)),
    );

    assert_eq!(engine.flying().count(), 0);
    let endpoint = engine
        .counters()
        .get_counter("order-service", "default")
        .and_then(|service| service.get_counter(ENDPOINT))
        .expect("endpoint counter created on admission");
    assert!(endpoint.access_time() > 0);
    let counter = endpoint
        .get_counter("service://order-service/orders?method=POST")
        .expect("uri counter created on admission");
    let snapshot = counter.snapshot();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.succeeded, 1);
}

#[tokio::test]
async fn given_concurrency_limit_when_slot_is_held_then_next_call_is_denied_until_completion() {
    let engine = engine(&service(
        r#"{ id: 1, concurrency_limit_policies: [{ name: "one-at-a-time", max_concurrency: 1 }] }"#,
    ));

    let first = engine.evaluate(&request(), ENDPOINT).await;
    assert!(first.is_admitted());

    let second = engine.evaluate(&request(), ENDPOINT).await;
    assert!(!second.is_admitted());
    assert_eq!(second.permission.error_code, CODE_CONCURRENCY_LIMIT);
    assert!(second.ticket.is_none());
    assert_eq!(engine.flying().count(), 1, "denied calls are not in flight");

    engine.complete(
        first.ticket.expect("ticket"),
        &CallOutcome::success(Duration::from_millis(1)),
    );
    assert!(engine.evaluate(&request(), ENDPOINT).await.is_admitted());
}

#[tokio::test]
async fn given_failing_calls_when_breaker_trips_then_calls_are_denied() {
    let engine = engine(&service(
        r#"{ id: 1, circuit_break_policies: [{ name: "cb", minimum_calls: 2, sliding_window_size: 2, wait_duration_in_open_ms: 60000 }] }"#,
    ));

    for _ in 0..2 {
        let decision = engine.evaluate(&request(), ENDPOINT).await;
        engine.complete(
            decision.ticket.expect("closed breaker admits"),
            &CallOutcome::failure(Duration::from_millis(1), "503"),
        );
    }

    let decision = engine.evaluate(&request(), ENDPOINT).await;
    assert!(!decision.is_admitted());
    assert_eq!(decision.permission.error_code, CODE_CIRCUIT_BREAK);
    assert_eq!(engine.breakers().len(), 1);
}

#[tokio::test]
async fn given_rate_limit_when_exhausted_then_held_concurrency_slot_is_returned() {
    let engine = engine(&service(
        r#"{
      id: 1,
      concurrency_limit_policies: [{ name: "pair", max_concurrency: 2 }],
      rate_limit_policies: [{ name: "once", sliding_windows: [{ threshold: 1, time_window_ms: 60000 }] }],
    }"#,
    ));

    let admitted = engine.evaluate(&request(), ENDPOINT).await;
    assert!(admitted.is_admitted());

    let limited = engine.evaluate(&request(), ENDPOINT).await;
    assert_eq!(limited.permission.error_code, CODE_RATE_LIMIT);

    let limited = engine.evaluate(&request(), ENDPOINT).await;
    assert_eq!(
        limited.permission.error_code, CODE_RATE_LIMIT,
        "the concurrency slot taken by the rate-limited call was released"
    );
}

#[tokio::test]
async fn given_instance_breaker_open_when_filtering_then_endpoint_is_ejected() {
    let engine = engine(&service(
        r#"{ id: 1, circuit_break_policies: [{ name: "outlier", level: "instance", minimum_calls: 1, sliding_window_size: 1, wait_duration_in_open_ms: 60000 }] }"#,
    ));
    let endpoints: Vec<Endpoint> = (0..4).map(|n| Endpoint::new(format!("10.0.0.{n}"), 8080)).collect();

    let decision = engine.evaluate(&request(), &endpoints[0].id).await;
    engine.complete(
        decision.ticket.expect("ticket"),
        &CallOutcome::failure(Duration::from_millis(1), "503"),
    );

    let kept = engine.filter_endpoints(&request(), endpoints.clone());

    assert_eq!(kept, endpoints[1..].to_vec());
    assert!(!engine.evaluate(&request(), &endpoints[0].id).await.is_admitted());
    assert!(engine.evaluate(&request(), &endpoints[1].id).await.is_admitted());
}

#[tokio::test]
async fn given_reloaded_rate_limit_with_new_threshold_when_evaluated_then_new_threshold_applies() {
    let (engine, supplier) = engine_and_supplier(
        EngineConfig::default(),
        &service(
            r#"{ id: 1, rate_limit_policies: [{ name: "burst", sliding_windows: [{ threshold: 1, time_window_ms: 60000 }] }] }"#,
        ),
    );
    assert!(engine.evaluate(&request(), ENDPOINT).await.is_admitted());
    let limited = engine.evaluate(&request(), ENDPOINT).await;
    assert_eq!(limited.permission.error_code, CODE_RATE_LIMIT);

    let reloaded = service(
        r#"{ id: 1, rate_limit_policies: [{ name: "burst", sliding_windows: [{ threshold: 100, time_window_ms: 60000 }] }] }"#,
    )
    .replace("version: 1", "version: 100");
    supplier
        .install(GovernancePolicy::parse(&reloaded).expect("document should parse"))
        .expect("policy should install");

    let decision = engine.evaluate(&request(), ENDPOINT).await;
    assert!(decision.is_admitted(), "denied with {:?}", decision.permission);
}

#[tokio::test]
async fn given_half_open_caller_cancelled_while_waiting_when_next_call_arrives_then_trial_slot_is_reused() {
    let engine = engine(&service(
        r#"{
      id: 1,
      circuit_break_policies: [{ name: "cb", minimum_calls: 1, sliding_window_size: 1, wait_duration_in_open_ms: 30, allowed_calls_in_half_open: 2 }],
      concurrency_limit_policies: [{ name: "single", max_concurrency: 1, max_wait_ms: 50 }],
    }"#,
    ));
    let tripping = engine.evaluate(&request(), ENDPOINT).await;
    engine.complete(
        tripping.ticket.expect("closed breaker admits"),
        &CallOutcome::failure(Duration::from_millis(1), "503"),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let holder = engine.evaluate(&request(), ENDPOINT).await;
    assert!(holder.is_admitted(), "first half-open trial");
    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        engine.evaluate(&request(), ENDPOINT),
    )
    .await;
    assert!(cancelled.is_err(), "second trial waits on the concurrency slot");

    let next = engine.evaluate(&request(), ENDPOINT).await;
    assert_eq!(
        next.permission.error_code, CODE_CONCURRENCY_LIMIT,
        "the cancelled caller's trial slot was handed back"
    );
}
