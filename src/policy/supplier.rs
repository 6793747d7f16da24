use std::{collections::BTreeSet, sync::Arc};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::{
    live::{LaneSpace, LiveSpace, UnitRouter},
    policy::{
        error::{PolicyError, duplicate_key, invalid_document, invalid_topology},
        model::ServicePolicy,
        service::Service,
    },
};

/// Immutable snapshot of everything the engine decides against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GovernancePolicy {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub live_spaces: Vec<LiveSpace>,
    #[serde(default)]
    pub lane_spaces: Vec<LaneSpace>,
}

impl GovernancePolicy {
    /// Parses a JSON5 policy document.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        json5::from_str(text)
            .map_err(|err| invalid_document(format!("failed to parse policy document: {err}")))
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.name == name)
    }

    pub fn service_policy(
        &self,
        service: &str,
        group: &str,
        path: &str,
        method: &str,
    ) -> Option<&ServicePolicy> {
        self.service(service)?.service_policy(group, path, method)
    }

    pub fn live_space(&self, id: &str) -> Option<&LiveSpace> {
        self.live_spaces.iter().find(|space| space.id == id)
    }

    pub fn lane_space(&self, id: &str) -> Option<&LaneSpace> {
        self.lane_spaces.iter().find(|space| space.id == id)
    }

    fn ensure_unique_keys(&self) -> Result<(), PolicyError> {
        ensure_unique("service", self.services.iter().map(|s| s.name.as_str()))?;
        ensure_unique("live space", self.live_spaces.iter().map(|s| s.id.as_str()))?;
        ensure_unique("lane space", self.lane_spaces.iter().map(|s| s.id.as_str()))?;
        for service in &self.services {
            ensure_unique(
                "service group",
                service.groups.iter().map(|g| g.name.as_str()),
            )?;
            if service.groups.iter().filter(|g| g.default_group).count() > 1 {
                return Err(invalid_document(format!(
                    "service '{}' declares more than one default group",
                    service.name
                )));
            }
        }
        Ok(())
    }
}

fn ensure_unique<'a>(kind: &str, keys: impl Iterator<Item = &'a str>) -> Result<(), PolicyError> {
    let mut seen = BTreeSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(duplicate_key(format!("{kind} '{key}' is declared more than once")));
        }
    }
    Ok(())
}

/// Source of the active policy snapshot.
pub trait PolicySupplier: Send + Sync {
    fn snapshot(&self) -> Arc<GovernancePolicy>;
}

/// Holds the active snapshot and swaps in new ones once they are prepared.
pub struct SnapshotPolicySupplier {
    router: Arc<UnitRouter>,
    current: ArcSwap<GovernancePolicy>,
}

impl SnapshotPolicySupplier {
    pub fn new(router: Arc<UnitRouter>) -> Self {
        Self {
            router,
            current: ArcSwap::from_pointee(GovernancePolicy::default()),
        }
    }

    pub fn version(&self) -> i64 {
        self.current.load().version
    }

    /// Supplements, prepares and validates `policy`, then makes it the active snapshot.
    ///
    /// A rejected policy leaves the previous snapshot in place.
    pub fn install(&self, policy: GovernancePolicy) -> Result<i64, PolicyError> {
        let version = policy.version;
        match self.prepare(policy) {
            Ok(prepared) => {
                let services = prepared.services.len();
                let live_spaces = prepared.live_spaces.len();
                self.current.store(Arc::new(prepared));
                tracing::info!(
                    target: "policy",
                    version = version,
                    services = services,
                    live_spaces = live_spaces,
                    "policy_installed"
                );
                Ok(version)
            }
            Err(err) => {
                tracing::warn!(
                    target: "policy",
                    version = version,
                    active_version = self.version(),
                    error = %err,
                    "policy_rejected"
                );
                Err(err)
            }
        }
    }

    fn prepare(&self, mut policy: GovernancePolicy) -> Result<GovernancePolicy, PolicyError> {
        policy.ensure_unique_keys()?;

        for space in &mut policy.live_spaces {
            let space_id = space.id.clone();
            self.router
                .prepare(space)
                .map_err(|err| invalid_topology(format!("live space '{space_id}': {err}")))?;
        }
        for space in &policy.lane_spaces {
            space
                .validate()
                .map_err(|err| invalid_topology(format!("lane space '{}': {err}", space.id)))?;
            for condition in space.rules.iter().flat_map(|rule| &rule.conditions) {
                condition.compile()?;
            }
        }

        for service in &mut policy.services {
            service.supplement_policies();
        }

        for service in &policy.services {
            for group in &service.groups {
                let policies = group.service_policy.iter().chain(
                    group
                        .paths
                        .iter()
                        .flat_map(|path| {
                            path.service_policy
                                .iter()
                                .chain(path.methods.iter().filter_map(|m| m.service_policy.as_ref()))
                        }),
                );
                for service_policy in policies {
                    check_references(&policy, &service.name, service_policy)?;
                    for condition in service_policy.conditions() {
                        condition.compile()?;
                    }
                }
            }
        }

        Ok(policy)
    }
}

fn check_references(
    policy: &GovernancePolicy,
    service: &str,
    service_policy: &ServicePolicy,
) -> Result<(), PolicyError> {
    if let Some(live) = service_policy.live_policy.as_ref()
        && let Some(space_id) = live.live_space_id.as_deref()
    {
        let space = policy.live_space(space_id).ok_or_else(|| {
            invalid_topology(format!(
                "service '{service}' references unknown live space '{space_id}'"
            ))
        })?;
        if let Some(rule_id) = live.unit_rule_id.as_deref()
            && space.rule(rule_id).is_none()
        {
            return Err(invalid_topology(format!(
                "service '{service}' references unknown unit rule '{rule_id}' in live space '{space_id}'"
            )));
        }
    }
    for lane in &service_policy.lane_policies {
        if policy.lane_space(&lane.lane_space_id).is_none() {
            return Err(invalid_topology(format!(
                "service '{service}' references unknown lane space '{}'",
                lane.lane_space_id
            )));
        }
    }
    Ok(())
}

impl PolicySupplier for SnapshotPolicySupplier {
    fn snapshot(&self) -> Arc<GovernancePolicy> {
        self.current.load_full()
    }
}
