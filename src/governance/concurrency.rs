use std::{sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout as with_timeout,
};

use crate::{
    governance::permission::{CODE_CONCURRENCY_LIMIT, Permission},
    policy::model::{ConcurrencyLimitPolicy, conditions_match},
    request::ServiceRequest,
};

/// Holds one concurrency slot; the slot is released when the lease drops.
#[derive(Debug)]
pub struct ConcurrencyLease {
    pub policy: String,
    _permit: OwnedSemaphorePermit,
}

struct PolicySemaphore {
    policy: ConcurrencyLimitPolicy,
    semaphore: Arc<Semaphore>,
}

#[derive(Default)]
pub struct ConcurrencyLimiter {
    semaphores: DashMap<String, PolicySemaphore>,
}

impl ConcurrencyLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, policy: &ConcurrencyLimitPolicy) -> Arc<Semaphore> {
        let key = policy
            .uri
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| policy.name.clone());
        let fresh = || PolicySemaphore {
            policy: policy.clone(),
            semaphore: Arc::new(Semaphore::new(policy.max_concurrency.max(1) as usize)),
        };
        match self.semaphores.entry(key) {
            // Leases on the replaced semaphore stay valid and release into it.
            Entry::Occupied(mut entry) if entry.get().policy != *policy => {
                entry.insert(fresh());
                entry.get().semaphore.clone()
            }
            Entry::Occupied(entry) => entry.get().semaphore.clone(),
            Entry::Vacant(entry) => entry.insert(fresh()).semaphore.clone(),
        }
    }

    /// Number of free slots for `policy`.
    pub fn available(&self, policy: &ConcurrencyLimitPolicy) -> usize {
        self.semaphore(policy).available_permits()
    }

    /// Takes a slot from every matching policy, waiting at most the policy's `max_wait_ms`.
    ///
    /// On denial every slot already taken is released.
    pub async fn acquire(
        &self,
        policies: &[ConcurrencyLimitPolicy],
        request: &ServiceRequest,
        default_timeout: Duration,
    ) -> Result<Vec<ConcurrencyLease>, Permission> {
        let mut leases = Vec::new();
        for policy in policies {
            if !conditions_match(&policy.conditions, request) {
                continue;
            }
            let semaphore = self.semaphore(policy);
            let timeout = policy
                .max_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(default_timeout);

            let permit = if timeout.is_zero() {
                semaphore.try_acquire_owned().ok()
            } else {
                with_timeout(timeout, semaphore.acquire_owned())
                    .await
                    .ok()
                    .and_then(Result::ok)
            };

            match permit {
                Some(permit) => leases.push(ConcurrencyLease {
                    policy: policy.name.clone(),
                    _permit: permit,
                }),
                None => {
                    tracing::debug!(
                        target: "governance",
                        policy = %policy.name,
                        service = %request.service,
                        "concurrency_limited"
                    );
                    return Err(Permission::failure_with_code(
                        CODE_CONCURRENCY_LIMIT,
                        format!(
                            "concurrency limit '{}' of {} reached",
                            policy.name, policy.max_concurrency
                        ),
                    ));
                }
            }
        }
        Ok(leases)
    }
}
