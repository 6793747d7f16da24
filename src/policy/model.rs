use std::{
    collections::{BTreeMap, BTreeSet},
    sync::OnceLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    policy::{
        error::{PolicyError, invalid_document},
        id::{
            KEY_AUTH, KEY_CIRCUIT_BREAK, KEY_CONCURRENCY_LIMIT, KEY_FAULT_INJECTION, KEY_LANE,
            KEY_LOAD_LIMIT, KEY_RATE_LIMIT, KEY_ROUTE, PolicyId,
        },
    },
    request::ServiceRequest,
};

/// A list-valued sub-policy that can be tagged with the identity of its owner.
pub trait NamedPolicy {
    /// Parameter key carrying this policy's name inside its [`PolicyId`].
    const KEY: &'static str;

    fn name(&self) -> &str;
    fn id_slot(&mut self) -> &mut Option<i64>;
    fn uri_slot(&mut self) -> &mut Option<PolicyId>;
}

macro_rules! named_policy {
    ($ty:ty, $key:expr) => {
        impl NamedPolicy for $ty {
            const KEY: &'static str = $key;

            fn name(&self) -> &str {
                &self.name
            }

            fn id_slot(&mut self) -> &mut Option<i64> {
                &mut self.id
            }

            fn uri_slot(&mut self) -> &mut Option<PolicyId> {
                &mut self.uri
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagSource {
    Header,
    Query,
    Cookie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TagOperator {
    #[default]
    Equal,
    NotEqual,
    In,
    NotIn,
    Prefix,
    Regex,
}

/// Request predicate shared by rate/concurrency/load limits and lane rules.
///
/// `regex` patterns are compiled once, by [`TagCondition::compile`] when a
/// policy is installed or lazily on first match otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCondition {
    pub source: TagSource,
    pub key: String,
    #[serde(default)]
    pub op: TagOperator,
    #[serde(default)]
    pub values: Vec<String>,
    #[serde(skip)]
    patterns: OnceLock<Vec<Regex>>,
}

impl PartialEq for TagCondition {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.key == other.key
            && self.op == other.op
            && self.values == other.values
    }
}

impl Eq for TagCondition {}

impl TagCondition {
    pub fn new<V: Into<String>>(
        source: TagSource,
        key: impl Into<String>,
        op: TagOperator,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            source,
            key: key.into(),
            op,
            values: values.into_iter().map(Into::into).collect(),
            patterns: OnceLock::new(),
        }
    }

    /// Compiles `regex` patterns, rejecting the condition if any is invalid.
    pub fn compile(&self) -> Result<(), PolicyError> {
        if self.op != TagOperator::Regex || self.patterns.get().is_some() {
            return Ok(());
        }
        let patterns = self
            .values
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    invalid_document(format!(
                        "condition on '{}' has invalid pattern '{pattern}': {err}",
                        self.key
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let _ = self.patterns.set(patterns);
        Ok(())
    }

    fn patterns(&self) -> &[Regex] {
        self.patterns.get_or_init(|| {
            self.values
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect()
        })
    }

    pub fn matches(&self, request: &ServiceRequest) -> bool {
        let actual = match self.source {
            TagSource::Header => request.header(&self.key),
            TagSource::Query => request.query(&self.key),
            TagSource::Cookie => request.cookie(&self.key),
        };

        match self.op {
            TagOperator::Equal => actual.is_some_and(|v| self.values.first().is_some_and(|e| e == v)),
            TagOperator::NotEqual => !actual.is_some_and(|v| self.values.first().is_some_and(|e| e == v)),
            TagOperator::In => actual.is_some_and(|v| self.values.iter().any(|e| e == v)),
            TagOperator::NotIn => !actual.is_some_and(|v| self.values.iter().any(|e| e == v)),
            TagOperator::Prefix => {
                actual.is_some_and(|v| self.values.iter().any(|e| v.starts_with(e.as_str())))
            }
            TagOperator::Regex => {
                actual.is_some_and(|v| self.patterns().iter().any(|regex| regex.is_match(v)))
            }
        }
    }
}

pub fn conditions_match(conditions: &[TagCondition], request: &ServiceRequest) -> bool {
    conditions.iter().all(|condition| condition.matches(request))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StickyType {
    None,
    Preferred,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoadBalancePolicy {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub policy_type: Option<String>,
    #[serde(default)]
    pub sticky_type: Option<StickyType>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub retry: Option<u32>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub error_codes: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClusterPolicy {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub cluster_type: Option<String>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPolicy {
    /// No live routing for this service.
    None,
    /// Always served by the center unit.
    Center,
    /// Routed by the unit rule.
    Unit,
    /// Served by the local unit when possible.
    PreferLocalUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellPolicy {
    PreferLocalCell,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceLivePolicy {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub write_protect: Option<bool>,
    #[serde(default)]
    pub unit_policy: Option<UnitPolicy>,
    #[serde(default)]
    pub cell_policy: Option<CellPolicy>,
    #[serde(default)]
    pub live_space_id: Option<String>,
    #[serde(default)]
    pub unit_rule_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindow {
    pub threshold: u32,
    pub time_window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub realize_type: Option<String>,
    pub sliding_windows: Vec<SlidingWindow>,
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

named_policy!(RateLimitPolicy, KEY_RATE_LIMIT);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyLimitPolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub version: i64,
    pub max_concurrency: u32,
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

named_policy!(ConcurrencyLimitPolicy, KEY_CONCURRENCY_LIMIT);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadLimitPolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub max_active: Option<u64>,
    /// CPU usage percentage above which calls are rejected.
    #[serde(default)]
    pub cpu_usage: Option<u32>,
    /// Load average per core, in percent, above which calls are rejected.
    #[serde(default)]
    pub load_usage: Option<u32>,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

named_policy!(LoadLimitPolicy, KEY_LOAD_LIMIT);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
    #[serde(default)]
    pub destinations: BTreeMap<String, String>,
}

named_policy!(RoutePolicy, KEY_ROUTE);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanePolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    pub lane_space_id: String,
    /// Target lane → lane actually used for this service.
    #[serde(default)]
    pub redirections: BTreeMap<String, String>,
}

named_policy!(LanePolicy, KEY_LANE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakLevel {
    #[default]
    Service,
    Api,
    Instance,
}

fn default_sliding_window_size() -> u32 {
    100
}

fn default_minimum_calls() -> u32 {
    10
}

fn default_failure_rate_threshold() -> f64 {
    50.0
}

fn default_wait_duration_in_open_ms() -> u64 {
    5_000
}

fn default_allowed_calls_in_half_open() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakPolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub level: CircuitBreakLevel,
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: u32,
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: u32,
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    #[serde(default)]
    pub slow_call_duration_ms: Option<u64>,
    #[serde(default)]
    pub slow_call_rate_threshold: Option<f64>,
    #[serde(default = "default_wait_duration_in_open_ms")]
    pub wait_duration_in_open_ms: u64,
    #[serde(default = "default_allowed_calls_in_half_open")]
    pub allowed_calls_in_half_open: u32,
    /// Maximum share of instances, in percent, that may be ejected at once.
    #[serde(default)]
    pub outlier_max_percent: i32,
    /// Failure codes that count toward the breaker; empty counts every failure.
    #[serde(default)]
    pub error_codes: BTreeSet<String>,
}

named_policy!(CircuitBreakPolicy, KEY_CIRCUIT_BREAK);

impl CircuitBreakPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            uri: None,
            version: 0,
            level: CircuitBreakLevel::default(),
            sliding_window_size: default_sliding_window_size(),
            minimum_calls: default_minimum_calls(),
            failure_rate_threshold: default_failure_rate_threshold(),
            slow_call_duration_ms: None,
            slow_call_rate_threshold: None,
            wait_duration_in_open_ms: default_wait_duration_in_open_ms(),
            allowed_calls_in_half_open: default_allowed_calls_in_half_open(),
            outlier_max_percent: 0,
            error_codes: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    pub auth_type: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

named_policy!(AuthPolicy, KEY_AUTH);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    Delay,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjectionPolicy {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub uri: Option<PolicyId>,
    pub fault_type: FaultType,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub percent: Option<u32>,
    #[serde(default)]
    pub conditions: Vec<TagCondition>,
}

named_policy!(FaultInjectionPolicy, KEY_FAULT_INJECTION);

/// Governance rules attached to one service, group, path or method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServicePolicy {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub load_balance_policy: Option<LoadBalancePolicy>,
    #[serde(default)]
    pub cluster_policy: Option<ClusterPolicy>,
    #[serde(default)]
    pub live_policy: Option<ServiceLivePolicy>,
    #[serde(default)]
    pub rate_limit_policies: Vec<RateLimitPolicy>,
    #[serde(default)]
    pub concurrency_limit_policies: Vec<ConcurrencyLimitPolicy>,
    #[serde(default)]
    pub load_limit_policies: Vec<LoadLimitPolicy>,
    #[serde(default)]
    pub route_policies: Vec<RoutePolicy>,
    #[serde(default)]
    pub lane_policies: Vec<LanePolicy>,
    #[serde(default)]
    pub circuit_break_policies: Vec<CircuitBreakPolicy>,
    #[serde(default)]
    pub auth_policies: Vec<AuthPolicy>,
    #[serde(default)]
    pub fault_injection_policies: Vec<FaultInjectionPolicy>,
}

impl ServicePolicy {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Every request condition across this policy's sub-policies.
    pub fn conditions(&self) -> impl Iterator<Item = &TagCondition> {
        let rate = self.rate_limit_policies.iter().flat_map(|p| &p.conditions);
        let concurrency = self.concurrency_limit_policies.iter().flat_map(|p| &p.conditions);
        let load = self.load_limit_policies.iter().flat_map(|p| &p.conditions);
        let route = self.route_policies.iter().flat_map(|p| &p.conditions);
        let fault = self.fault_injection_policies.iter().flat_map(|p| &p.conditions);
        rate.chain(concurrency).chain(load).chain(route).chain(fault)
    }
}
