use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use dashmap::DashMap;

use crate::{counter::counter::Counter, request::Endpoint};

/// Per-URI counters of one endpoint.
#[derive(Debug)]
pub struct EndpointCounter {
    endpoint_id: String,
    access_time: AtomicI64,
    counters: DashMap<String, Arc<Counter>>,
}

impl EndpointCounter {
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            access_time: AtomicI64::new(0),
            counters: DashMap::new(),
        }
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn get_or_create_counter(&self, uri: &str) -> Arc<Counter> {
        self.counters
            .entry(uri.to_string())
            .or_insert_with(|| Arc::new(Counter::new()))
            .clone()
    }

    pub fn get_counter(&self, uri: &str) -> Option<Arc<Counter>> {
        self.counters.get(uri).map(|counter| counter.clone())
    }

    /// Records when the endpoint was last used, in epoch milliseconds.
    pub fn set_access_time(&self, millis: i64) {
        self.access_time.fetch_max(millis, Ordering::Relaxed);
    }

    pub fn access_time(&self) -> i64 {
        self.access_time.load(Ordering::Relaxed)
    }

    /// Calls in flight across all URIs of the endpoint.
    pub fn active(&self) -> u64 {
        self.counters.iter().map(|counter| counter.active()).sum()
    }
}

struct CleaningGuard<'a>(&'a AtomicBool);

impl Drop for CleaningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Endpoint counters of one service group.
#[derive(Debug)]
pub struct ServiceCounter {
    service: String,
    group: String,
    endpoints: DashMap<String, Arc<EndpointCounter>>,
    cleaning: AtomicBool,
}

impl ServiceCounter {
    pub fn new(service: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            group: group.into(),
            endpoints: DashMap::new(),
            cleaning: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get_or_create_counter(&self, endpoint_id: &str) -> Arc<EndpointCounter> {
        self.endpoints
            .entry(endpoint_id.to_string())
            .or_insert_with(|| Arc::new(EndpointCounter::new(endpoint_id)))
            .clone()
    }

    pub fn get_counter(&self, endpoint_id: &str) -> Option<Arc<EndpointCounter>> {
        self.endpoints.get(endpoint_id).map(|counter| counter.clone())
    }

    /// Drops counters of endpoints missing from `endpoints`.
    ///
    /// Returns `false` without doing anything when another pass is running.
    pub fn try_clean(&self, endpoints: &[Endpoint]) -> bool {
        if self
            .cleaning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let _guard = CleaningGuard(&self.cleaning);

        let present: HashSet<&str> = endpoints.iter().map(|e| e.id.as_str()).collect();
        let before = self.endpoints.len();
        self.endpoints.retain(|id, _| present.contains(id.as_str()));
        let removed = before.saturating_sub(self.endpoints.len());
        if removed > 0 {
            tracing::debug!(
                target: "counter",
                service = %self.service,
                group = %self.group,
                removed = removed,
                "endpoint_counters_cleaned"
            );
        }
        true
    }
}

/// Root of the counter tree, keyed by `(service, group)`.
#[derive(Debug, Default)]
pub struct CounterManager {
    services: DashMap<(String, String), Arc<ServiceCounter>>,
}

impl CounterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_counter(&self, service: &str, group: &str) -> Arc<ServiceCounter> {
        self.services
            .entry((service.to_string(), group.to_string()))
            .or_insert_with(|| Arc::new(ServiceCounter::new(service, group)))
            .clone()
    }

    pub fn get_counter(&self, service: &str, group: &str) -> Option<Arc<ServiceCounter>> {
        self.services
            .get(&(service.to_string(), group.to_string()))
            .map(|counter| counter.clone())
    }

    pub fn service_counters(&self) -> Vec<Arc<ServiceCounter>> {
        self.services.iter().map(|entry| entry.value().clone()).collect()
    }
}
