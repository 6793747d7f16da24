use crate::policy::{
    id::PolicyId,
    model::{
        ClusterPolicy, LoadBalancePolicy, NamedPolicy, RetryPolicy, ServiceLivePolicy,
        ServicePolicy,
    },
};

/// Fills absent fields of `self` from a fallback of the same type.
///
/// Populated fields are never overwritten.
pub trait Supplement {
    fn supplement(&mut self, source: &Self);
}

fn fill<T: Clone>(slot: &mut Option<T>, source: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(source);
    }
}

impl Supplement for LoadBalancePolicy {
    fn supplement(&mut self, source: &Self) {
        fill(&mut self.policy_type, &source.policy_type);
        fill(&mut self.sticky_type, &source.sticky_type);
        for (key, value) in &source.parameters {
            self.parameters
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

impl Supplement for RetryPolicy {
    fn supplement(&mut self, source: &Self) {
        fill(&mut self.retry, &source.retry);
        fill(&mut self.interval_ms, &source.interval_ms);
        fill(&mut self.timeout_ms, &source.timeout_ms);
        if self.error_codes.is_empty() {
            self.error_codes.clone_from(&source.error_codes);
        }
    }
}

impl Supplement for ClusterPolicy {
    fn supplement(&mut self, source: &Self) {
        fill(&mut self.cluster_type, &source.cluster_type);
        match (self.retry_policy.as_mut(), source.retry_policy.as_ref()) {
            (Some(retry), Some(fallback)) => retry.supplement(fallback),
            (None, Some(fallback)) => {
                let mut retry = fallback.clone();
                retry.id = self.id;
                self.retry_policy = Some(retry);
            }
            _ => {}
        }
    }
}

impl Supplement for ServiceLivePolicy {
    fn supplement(&mut self, source: &Self) {
        fill(&mut self.write_protect, &source.write_protect);
        fill(&mut self.unit_policy, &source.unit_policy);
        fill(&mut self.cell_policy, &source.cell_policy);
        fill(&mut self.live_space_id, &source.live_space_id);
        fill(&mut self.unit_rule_id, &source.unit_rule_id);
    }
}

/// Singleton slot merge: adopt a copy re-owned by `owner_id`, or fill absent fields.
fn supplement_slot<T, F>(slot: &mut Option<T>, source: Option<&T>, reown: F)
where
    T: Supplement + Clone,
    F: FnOnce(&mut T),
{
    let Some(source) = source else {
        return;
    };
    match slot {
        Some(current) => current.supplement(source),
        None => {
            let mut adopted = source.clone();
            reown(&mut adopted);
            adopted.supplement(source);
            *slot = Some(adopted);
        }
    }
}

/// List merge: adopt the fallback list verbatim only when the target has none.
fn supplement_list<T: Clone>(target: &mut Vec<T>, source: &[T]) {
    if target.is_empty() && !source.is_empty() {
        *target = source.to_vec();
    }
}

fn tag_list<T: NamedPolicy>(items: &mut [T], owner: &PolicyId, owner_id: i64) {
    for item in items {
        if item.uri_slot().is_none() {
            let uri = owner.with_parameter(T::KEY, item.name());
            *item.uri_slot() = Some(uri);
        }
        item.id_slot().get_or_insert(owner_id);
    }
}

impl ServicePolicy {
    /// Merges `source` into `self`, treating `self` as authoritative.
    pub fn supplement(&mut self, source: Option<&ServicePolicy>) {
        let Some(source) = source else {
            return;
        };
        let owner_id = self.id;

        supplement_slot(
            &mut self.load_balance_policy,
            source.load_balance_policy.as_ref(),
            |policy| policy.id = Some(owner_id),
        );
        supplement_slot(
            &mut self.cluster_policy,
            source.cluster_policy.as_ref(),
            |policy| {
                policy.id = Some(owner_id);
                if let Some(retry) = policy.retry_policy.as_mut() {
                    retry.id = Some(owner_id);
                }
            },
        );
        supplement_slot(
            &mut self.live_policy,
            source.live_policy.as_ref(),
            |policy| policy.id = Some(owner_id),
        );

        supplement_list(&mut self.rate_limit_policies, &source.rate_limit_policies);
        supplement_list(
            &mut self.concurrency_limit_policies,
            &source.concurrency_limit_policies,
        );
        supplement_list(&mut self.load_limit_policies, &source.load_limit_policies);
        supplement_list(&mut self.route_policies, &source.route_policies);
        supplement_list(&mut self.lane_policies, &source.lane_policies);
        supplement_list(
            &mut self.circuit_break_policies,
            &source.circuit_break_policies,
        );
        supplement_list(&mut self.auth_policies, &source.auth_policies);
        supplement_list(
            &mut self.fault_injection_policies,
            &source.fault_injection_policies,
        );
    }

    /// Assigns identity to every sub-policy that has none yet.
    ///
    /// Singletons take `owner` as is; list entries take `owner` plus their
    /// type key set to their name.
    pub fn tag(&mut self, owner: &PolicyId) {
        let owner_id = self.id;

        if let Some(policy) = self.load_balance_policy.as_mut() {
            policy.id.get_or_insert(owner_id);
            policy.uri.get_or_insert_with(|| owner.clone());
        }
        if let Some(policy) = self.cluster_policy.as_mut() {
            policy.id.get_or_insert(owner_id);
            policy.uri.get_or_insert_with(|| owner.clone());
            if let Some(retry) = policy.retry_policy.as_mut() {
                retry.id.get_or_insert(owner_id);
            }
        }
        if let Some(policy) = self.live_policy.as_mut() {
            policy.id.get_or_insert(owner_id);
            policy.uri.get_or_insert_with(|| owner.clone());
        }

        tag_list(&mut self.rate_limit_policies, owner, owner_id);
        tag_list(&mut self.concurrency_limit_policies, owner, owner_id);
        tag_list(&mut self.load_limit_policies, owner, owner_id);
        tag_list(&mut self.route_policies, owner, owner_id);
        tag_list(&mut self.lane_policies, owner, owner_id);
        tag_list(&mut self.circuit_break_policies, owner, owner_id);
        tag_list(&mut self.auth_policies, owner, owner_id);
        tag_list(&mut self.fault_injection_policies, owner, owner_id);
    }
}
