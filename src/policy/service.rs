use serde::{Deserialize, Serialize};

use crate::policy::{
    id::{KEY_GROUP, KEY_METHOD, PolicyId},
    model::ServicePolicy,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMethod {
    pub name: String,
    #[serde(default)]
    pub service_policy: Option<ServicePolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePath {
    pub path: String,
    #[serde(default)]
    pub service_policy: Option<ServicePolicy>,
    #[serde(default)]
    pub methods: Vec<ServiceMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceGroup {
    pub name: String,
    #[serde(default)]
    pub default_group: bool,
    #[serde(default)]
    pub service_policy: Option<ServicePolicy>,
    #[serde(default)]
    pub paths: Vec<ServicePath>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub groups: Vec<ServiceGroup>,
}

/// Supplements `slot` from `parent`, creating an empty policy when only the parent has one.
fn inherit(slot: &mut Option<ServicePolicy>, parent: Option<&ServicePolicy>, fallback_id: i64) {
    match (slot.as_mut(), parent) {
        (Some(policy), parent) => policy.supplement(parent),
        (None, Some(parent)) => {
            let mut policy = ServicePolicy::new(fallback_id);
            policy.supplement(Some(parent));
            *slot = Some(policy);
        }
        (None, None) => {}
    }
}

impl Service {
    pub fn group(&self, name: &str) -> Option<&ServiceGroup> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn default_group(&self) -> Option<&ServiceGroup> {
        self.groups.iter().find(|group| group.default_group)
    }

    pub fn owner_uri(&self, group: &str, path: &str, method: Option<&str>) -> PolicyId {
        let uri = PolicyId::service(&self.name, path).with_parameter(KEY_GROUP, group);
        match method {
            Some(method) => uri.with_parameter(KEY_METHOD, method),
            None => uri,
        }
    }

    /// Runs the load-time inheritance chain: default group → group → path → method.
    ///
    /// Every policy in the tree is tagged with the identity of its owner afterwards.
    pub fn supplement_policies(&mut self) {
        let default_policy = self
            .default_group()
            .and_then(|group| group.service_policy.clone());

        for group in &mut self.groups {
            if !group.default_group {
                let fallback_id = default_policy.as_ref().map(|p| p.id).unwrap_or_default();
                inherit(&mut group.service_policy, default_policy.as_ref(), fallback_id);
            }
            let group_policy = group.service_policy.clone();

            for path in &mut group.paths {
                let fallback_id = group_policy.as_ref().map(|p| p.id).unwrap_or_default();
                inherit(&mut path.service_policy, group_policy.as_ref(), fallback_id);
                let path_policy = path.service_policy.clone();

                for method in &mut path.methods {
                    let fallback_id = path_policy.as_ref().map(|p| p.id).unwrap_or_default();
                    inherit(&mut method.service_policy, path_policy.as_ref(), fallback_id);
                }
            }
        }

        let service_name = self.name.clone();
        for group in &mut self.groups {
            let group_uri = PolicyId::service(&service_name, "").with_parameter(KEY_GROUP, &group.name);
            if let Some(policy) = group.service_policy.as_mut() {
                policy.tag(&group_uri);
            }
            for path in &mut group.paths {
                let path_uri =
                    PolicyId::service(&service_name, &path.path).with_parameter(KEY_GROUP, &group.name);
                if let Some(policy) = path.service_policy.as_mut() {
                    policy.tag(&path_uri);
                }
                for method in &mut path.methods {
                    let method_uri = path_uri.with_parameter(KEY_METHOD, &method.name);
                    if let Some(policy) = method.service_policy.as_mut() {
                        policy.tag(&method_uri);
                    }
                }
            }
        }
    }

    /// Most specific policy for the call, falling back method → path → group → default group.
    pub fn service_policy(&self, group: &str, path: &str, method: &str) -> Option<&ServicePolicy> {
        let group = self.group(group).or_else(|| self.default_group())?;

        let path_entry = group
            .paths
            .iter()
            .filter(|candidate| path_matches(&candidate.path, path))
            .max_by_key(|candidate| candidate.path.len());

        if let Some(path_entry) = path_entry {
            let method_policy = path_entry
                .methods
                .iter()
                .find(|candidate| candidate.name == method)
                .and_then(|candidate| candidate.service_policy.as_ref());
            if let Some(policy) = method_policy.or(path_entry.service_policy.as_ref()) {
                return Some(policy);
            }
        }

        group
            .service_policy
            .as_ref()
            .or_else(|| self.default_group().and_then(|g| g.service_policy.as_ref()))
    }
}

/// Exact match, or prefix match on a `/` boundary.
fn path_matches(declared: &str, actual: &str) -> bool {
    let declared = declared.trim_end_matches('/');
    if declared.is_empty() {
        return true;
    }
    actual == declared
        || actual
            .strip_prefix(declared)
            .is_some_and(|rest| rest.starts_with('/'))
}
