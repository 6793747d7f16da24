use std::sync::Arc;

use livegov::{
    live::UnitRouter,
    policy::{GovernancePolicy, PolicyErrorKind, PolicySupplier, SnapshotPolicySupplier},
};

const LIVE_SPACE: &str = r#"
    {
      id: "space",
      center_unit: "east",
      units: [
        { code: "east", weight: 3, cells: [{ code: "east-1" }] },
        { code: "west", weight: 1 },
      ],
      unit_rules: [
        {
          id: "by-user",
          modulo: 100,
          allocation: "weight",
          variable: { type: "http", location: "header", key: "x-user" },
        },
      ],
    }"#;

fn document(version: i64, live_policy: &str) -> String {
    format!(
        r#"{{
  version: {version},
  live_spaces: [{LIVE_SPACE}],
  services: [
    {{
      name: "order-service",
      groups: [{{ name: "default", default_group: true, service_policy: {{ id: 1, live_policy: {live_policy} }} }}],
    }},
  ],
}}"#
    )
}

fn supplier() -> SnapshotPolicySupplier {
    SnapshotPolicySupplier::new(Arc::new(UnitRouter::with_defaults()))
}

#[test]
fn given_valid_document_when_installed_then_snapshot_is_prepared() {
    let supplier = supplier();
    let policy = GovernancePolicy::parse(&document(
        7,
        r#"{ live_space_id: "space", unit_rule_id: "by-user" }"#,
    ))
    .expect("document should parse");

    let version = supplier.install(policy).expect("policy should install");

    assert_eq!(version, 7);
    assert_eq!(supplier.version(), 7);
    let snapshot = supplier.snapshot();
    let rule = snapshot
        .live_space("space")
        .and_then(|space| space.rule("by-user"))
        .expect("rule should be present");
    let widths: Vec<(String, u32)> = rule
        .ranges
        .iter()
        .map(|range| (range.unit.clone(), range.width()))
        .collect();
    assert_eq!(widths, vec![("east".to_string(), 75), ("west".to_string(), 25)]);

    let resolved = snapshot
        .service_policy("order-service", "default", "/", "GET")
        .expect("policy should resolve");
    let live = resolved.live_policy.as_ref().expect("live policy");
    assert!(live.uri.is_some(), "installed policies are tagged");
}

#[test]
fn given_unknown_unit_rule_reference_when_installed_then_previous_snapshot_stays_active() {
    let supplier = supplier();
    supplier
        .install(GovernancePolicy::parse(&document(1, r#"{ live_space_id: "space" }"#)).expect("parse"))
        .expect("first policy should install");

    let err = supplier
        .install(
            GovernancePolicy::parse(&document(
                2,
                r#"{ live_space_id: "space", unit_rule_id: "by-tenant" }"#,
            ))
            .expect("parse"),
        )
        .expect_err("unknown rule must be rejected");

    assert_eq!(err.kind, PolicyErrorKind::InvalidTopology);
    assert_eq!(supplier.version(), 1);
}

#[test]
fn given_unknown_live_space_reference_when_installed_then_invalid_topology_is_returned() {
    let supplier = supplier();

    let err = supplier
        .install(GovernancePolicy::parse(&document(1, r#"{ live_space_id: "elsewhere" }"#)).expect("parse"))
        .expect_err("unknown space must be rejected");

    assert_eq!(err.kind, PolicyErrorKind::InvalidTopology);
    assert_eq!(supplier.version(), 0);
}

#[test]
fn given_two_default_groups_when_installed_then_invalid_document_is_returned() {
    let supplier = supplier();
    let policy = GovernancePolicy::parse(
        r#"{
  services: [{ name: "svc", groups: [{ name: "a", default_group: true }, { name: "b", default_group: true }] }],
}"#,
    )
    .expect("parse");

    let err = supplier.install(policy).expect_err("two default groups");
    assert_eq!(err.kind, PolicyErrorKind::InvalidDocument);
}

#[test]
fn given_malformed_text_when_parsed_then_invalid_document_is_returned() {
    let err = GovernancePolicy::parse("{ services: [ }").expect_err("malformed");
    assert_eq!(err.kind, PolicyErrorKind::InvalidDocument);
}

#[test]
fn given_invalid_regex_condition_when_installed_then_document_is_rejected_and_previous_kept() {
    let supplier = supplier();
    supplier
        .install(GovernancePolicy::parse(&document(1, r#"{ live_space_id: "space" }"#)).expect("parse"))
        .expect("first policy should install");
    let policy = GovernancePolicy::parse(
        r#"{
  version: 2,
  services: [{
    name: "svc",
    groups: [{
      name: "default",
      default_group: true,
      service_policy: {
        id: 1,
        rate_limit_policies: [{
          name: "tenants",
          sliding_windows: [{ threshold: 5, time_window_ms: 1000 }],
          conditions: [{ source: "header", key: "x-tenant", op: "regex", values: ["(unclosed"] }],
        }],
      },
    }],
  }],
}"#,
    )
    .expect("parse");

    let err = supplier.install(policy).expect_err("invalid pattern must be rejected");

    assert_eq!(err.kind, PolicyErrorKind::InvalidDocument);
    assert!(err.message.contains("(unclosed"));
    assert_eq!(supplier.version(), 1);
}
