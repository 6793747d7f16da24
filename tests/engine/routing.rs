use livegov::{live::RouteSource, request::ServiceRequest};

use crate::engine;

const DOCUMENT: &str = r#"{
  version: 5,
  live_spaces: [
    {
      id: "space",
      center_unit: "west",
      units: [
        { code: "east", cells: [{ code: "east-1" }] },
        { code: "west", cells: [{ code: "west-1" }] },
      ],
      unit_rules: [
        {
          id: "by-user",
          modulo: 100,
          function: "modulo",
          variable: { type: "http", location: "header", key: "x-user" },
          ranges: [
            { unit: "east", start: 0, end: 50 },
            { unit: "west", start: 50, end: 100 },
          ],
        },
      ],
    },
  ],
  lane_spaces: [
    {
      id: "lanes",
      lanes: [{ code: "base", default_lane: true }, { code: "beta" }, { code: "gray" }],
      rules: [{ id: "beta-users", lane: "beta", conditions: [{ source: "header", key: "x-beta", values: ["1"] }] }],
    },
  ],
  services: [
    {
      name: "order-service",
      groups: [
        {
          name: "default",
          default_group: true,
          service_policy: {
            id: 1,
            live_policy: { unit_policy: "unit", live_space_id: "space", unit_rule_id: "by-user" },
            lane_policies: [{ name: "to-gray", lane_space_id: "lanes", redirections: { beta: "gray" } }],
          },
        },
      ],
    },
    { name: "inventory-service" },
  ],
}"#;

#[test]
fn given_routed_service_when_routed_then_unit_and_redirected_lane_are_resolved() {
    let engine = engine(DOCUMENT);
    let request = ServiceRequest::new("order-service")
        .with_header("x-user", "u-88")
        .with_header("x-beta", "1");

    let route = engine.route(&request);

    let live = route.live.expect("live route");
    assert_eq!(live.source, RouteSource::Rule);
    assert_eq!(live.target_unit.as_deref(), Some("west"));
    assert!(live.is_cross_unit());
    let lane = route.lane.expect("lane route");
    assert_eq!(lane.effective_lane(), Some("gray"));
    assert!(!lane.is_local_lane());
}

#[test]
fn given_service_without_policy_when_routed_then_location_lane_space_applies() {
    let engine = engine(DOCUMENT);
    let request = ServiceRequest::new("inventory-service").with_header("x-beta", "1");

    let route = engine.route(&request);

    assert!(route.live.is_none());
    let lane = route.lane.expect("location lane space");
    assert_eq!(lane.target_lane.as_deref(), Some("beta"));
    assert_eq!(lane.local_lane.as_deref(), Some("base"));
}

#[tokio::test]
async fn given_admitted_call_when_evaluated_then_decision_carries_route() {
    let engine = engine(DOCUMENT);
    let request = ServiceRequest::new("order-service").with_header("x-user", "u-12");

    let decision = engine.evaluate(&request, "10.0.0.1:8080").await;

    assert!(decision.is_admitted());
    let live = decision.route.live.expect("live route");
    assert_eq!(live.target_unit.as_deref(), Some("east"));
    assert_eq!(live.target_cell.as_deref(), Some("east-1"));
    assert_eq!(decision.route.lane.and_then(|lane| lane.effective_lane().map(str::to_string)), Some("base".to_string()));
}
