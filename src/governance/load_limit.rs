use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use sysinfo::System;

use crate::{
    governance::permission::{CODE_LOAD_LIMIT, Permission},
    policy::model::{LoadLimitPolicy, conditions_match},
    request::ServiceRequest,
};

const SAMPLE_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LoadSample {
    /// Global CPU usage, in percent.
    pub cpu_usage: f32,
    /// One-minute load average per core, in percent.
    pub load_per_core: f64,
}

pub trait LoadSampler: Send + Sync {
    fn sample(&self) -> LoadSample;
}

struct CachedSystem {
    system: System,
    last_refresh: Instant,
    sample: LoadSample,
}

/// Host load read through `sysinfo`, refreshed at most once per second.
pub struct SystemLoadSampler {
    cached: Mutex<CachedSystem>,
}

impl SystemLoadSampler {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        let sample = Self::read(&system);
        Self {
            cached: Mutex::new(CachedSystem {
                system,
                last_refresh: Instant::now(),
                sample,
            }),
        }
    }

    fn read(system: &System) -> LoadSample {
        let cores = system.cpus().len().max(1) as f64;
        LoadSample {
            cpu_usage: system.global_cpu_usage(),
            load_per_core: System::load_average().one / cores * 100.0,
        }
    }
}

impl Default for SystemLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SystemLoadSampler {
    fn sample(&self) -> LoadSample {
        let mut cached = self.cached.lock();
        if cached.last_refresh.elapsed() > SAMPLE_REFRESH_INTERVAL {
            cached.system.refresh_cpu_usage();
            cached.sample = Self::read(&cached.system);
            cached.last_refresh = Instant::now();
        }
        cached.sample
    }
}

/// Rejects calls while the endpoint or the host is overloaded.
pub struct LoadLimiter {
    sampler: Arc<dyn LoadSampler>,
}

impl LoadLimiter {
    pub fn new(sampler: Arc<dyn LoadSampler>) -> Self {
        Self { sampler }
    }

    /// `active` is the number of calls currently in flight on the target counter.
    pub fn evaluate(
        &self,
        policies: &[LoadLimitPolicy],
        request: &ServiceRequest,
        active: u64,
    ) -> Permission {
        let mut sample = None;
        for policy in policies {
            if !conditions_match(&policy.conditions, request) {
                continue;
            }
            if let Some(max_active) = policy.max_active
                && active >= max_active
            {
                return self.reject(policy, request, format!("{active} active calls"));
            }
            if policy.cpu_usage.is_none() && policy.load_usage.is_none() {
                continue;
            }

            let current = *sample.get_or_insert_with(|| self.sampler.sample());
            if let Some(cpu) = policy.cpu_usage
                && current.cpu_usage >= cpu as f32
            {
                return self.reject(policy, request, format!("cpu at {:.1}%", current.cpu_usage));
            }
            if let Some(load) = policy.load_usage
                && current.load_per_core >= f64::from(load)
            {
                return self.reject(
                    policy,
                    request,
                    format!("load at {:.1}% per core", current.load_per_core),
                );
            }
        }
        Permission::success()
    }

    fn reject(&self, policy: &LoadLimitPolicy, request: &ServiceRequest, reason: String) -> Permission {
        tracing::debug!(
            target: "governance",
            policy = %policy.name,
            service = %request.service,
            reason = %reason,
            "load_limited"
        );
        Permission::failure_with_code(
            CODE_LOAD_LIMIT,
            format!("load limit '{}' exceeded: {reason}", policy.name),
        )
    }
}
