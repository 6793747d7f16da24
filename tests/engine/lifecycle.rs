use std::{sync::Arc, time::Duration};

use livegov::{
    config::EngineConfig,
    counter::{StaticEndpointSupplier, StaticEndpoints},
    governance::{CallOutcome, permission::CODE_DRAINING},
    request::{Endpoint, ServiceRequest},
};

use crate::{engine, engine_with};

const SINGLE_SLOT: &str = r#"{
  version: 1,
  services: [{
    name: "order-service",
    groups: [{
      name: "default",
      default_group: true,
      service_policy: { id: 1, concurrency_limit_policies: [{ name: "single", max_concurrency: 1, max_wait_ms: 5000 }] },
    }],
  }],
}"#;

fn request() -> ServiceRequest {
    ServiceRequest::new("order-service").with_path("/orders")
}

#[tokio::test]
async fn given_idle_engine_when_drained_then_drain_completes_immediately() {
    let engine = engine("{ version: 1 }");

    assert!(engine.drain(Duration::from_millis(100)).await);
    assert!(engine.is_draining());
    assert!(engine.flying().is_done());
}

#[tokio::test]
async fn given_call_in_flight_when_drained_then_drain_waits_for_completion() {
    let engine = engine("{ version: 1 }");
    let decision = engine.evaluate(&request(), "10.0.0.1:8080").await;
    let ticket = decision.ticket.expect("admitted");

    let (drained, ()) = tokio::join!(engine.drain(Duration::from_secs(2)), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        engine.complete(ticket, &CallOutcome::success(Duration::from_millis(30)));
    });

    assert!(drained);
    assert_eq!(engine.flying().count(), 0);
}

#[tokio::test]
async fn given_draining_engine_when_evaluated_then_call_is_denied() {
    let engine = engine("{ version: 1 }");
    let decision = engine.evaluate(&request(), "10.0.0.1:8080").await;
    let ticket = decision.ticket.expect("admitted");

    assert!(!engine.drain(Duration::from_millis(20)).await, "one call is still in flight");

    let denied = engine.evaluate(&request(), "10.0.0.1:8080").await;
    assert!(!denied.is_admitted());
    assert_eq!(denied.permission.error_code, CODE_DRAINING);
    assert_eq!(engine.flying().count(), 1);

    engine.complete(ticket, &CallOutcome::success(Duration::ZERO));
    assert!(engine.flying().is_done());
}

#[tokio::test]
async fn given_evaluation_waiting_for_a_slot_when_cancelled_then_it_leaves_no_flight_behind() {
    let engine = engine(SINGLE_SLOT);
    let holder = engine.evaluate(&request(), "10.0.0.1:8080").await;
    let ticket = holder.ticket.expect("first call takes the slot");

    let waiting = tokio::time::timeout(
        Duration::from_millis(20),
        engine.evaluate(&request(), "10.0.0.1:8080"),
    )
    .await;
    assert!(waiting.is_err(), "second call is still waiting for the slot");
    assert_eq!(engine.flying().count(), 1);

    engine.complete(ticket, &CallOutcome::success(Duration::from_millis(20)));
    assert_eq!(engine.flying().count(), 0);
    assert!(engine.drain(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn given_admitted_decision_when_dropped_then_call_is_settled_as_failed() {
    let engine = engine(SINGLE_SLOT);
    let decision = engine.evaluate(&request(), "10.0.0.1:8080").await;
    assert!(decision.is_admitted());
    assert_eq!(engine.flying().count(), 1);

    drop(decision);

    assert_eq!(engine.flying().count(), 0);
    let snapshot = engine
        .counters()
        .get_counter("order-service", "default")
        .and_then(|service| service.get_counter("10.0.0.1:8080"))
        .and_then(|endpoint| endpoint.get_counter("service://order-service/orders"))
        .expect("uri counter")
        .snapshot();
    assert_eq!(snapshot.active, 0);
    assert_eq!(snapshot.failed, 1);

    let next = tokio::time::timeout(
        Duration::from_millis(100),
        engine.evaluate(&request(), "10.0.0.1:8080"),
    )
    .await
    .expect("the concurrency slot was returned");
    assert!(next.is_admitted());
    drop(next);
    assert!(engine.drain(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn given_started_cleaner_when_started_again_then_second_start_is_refused() {
    let engine = engine_with(
        EngineConfig {
            cleanup_interval_ms: 10,
            ..EngineConfig::default()
        },
        "{ version: 1 }",
    );
    let decision = engine.evaluate(&request(), "10.0.0.9:8080").await;
    engine.complete(decision.ticket.expect("admitted"), &CallOutcome::success(Duration::ZERO));

    let supplier = Arc::new(StaticEndpointSupplier::from_entries([StaticEndpoints {
        service: "order-service".to_string(),
        group: "default".to_string(),
        endpoints: vec![Endpoint::new("10.0.0.1", 8080)],
    }]));
    assert!(engine.start_cleaner(supplier.clone()));
    assert!(!engine.start_cleaner(supplier));

    let service = engine
        .counters()
        .get_counter("order-service", "default")
        .expect("service counter");
    tokio::time::timeout(Duration::from_secs(1), async {
        while service.get_counter("10.0.0.9:8080").is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stale endpoint counter should be cleaned");

    tokio::time::timeout(Duration::from_secs(1), engine.shutdown())
        .await
        .expect("shutdown should stop the cleaner");
}
