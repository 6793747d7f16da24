use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    counter::manager::CounterManager,
    request::{DEFAULT_GROUP, Endpoint},
};

/// Authoritative endpoint lists, as known to discovery.
pub trait EndpointSupplier: Send + Sync {
    /// `None` when discovery has no answer for the service; its counters are then kept.
    fn endpoints(&self, service: &str, group: &str) -> Option<Vec<Endpoint>>;
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticEndpoints {
    pub service: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// Fixed endpoint lists, e.g. declared in the process configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticEndpointSupplier {
    endpoints: HashMap<(String, String), Vec<Endpoint>>,
}

impl StaticEndpointSupplier {
    pub fn from_entries(entries: impl IntoIterator<Item = StaticEndpoints>) -> Self {
        let endpoints = entries
            .into_iter()
            .map(|entry| ((entry.service, entry.group), entry.endpoints))
            .collect();
        Self { endpoints }
    }
}

impl EndpointSupplier for StaticEndpointSupplier {
    fn endpoints(&self, service: &str, group: &str) -> Option<Vec<Endpoint>> {
        self.endpoints
            .get(&(service.to_string(), group.to_string()))
            .cloned()
    }
}

/// Periodically reconciles every service counter against discovery.
pub struct CounterCleaner {
    manager: Arc<CounterManager>,
    supplier: Arc<dyn EndpointSupplier>,
    interval: Duration,
}

impl CounterCleaner {
    pub fn new(
        manager: Arc<CounterManager>,
        supplier: Arc<dyn EndpointSupplier>,
        interval: Duration,
    ) -> Self {
        Self {
            manager,
            supplier,
            interval,
        }
    }

    /// Runs one pass; returns how many service counters were cleaned.
    pub fn clean_once(&self) -> usize {
        let mut cleaned = 0;
        for counter in self.manager.service_counters() {
            let Some(endpoints) = self.supplier.endpoints(counter.service(), counter.group()) else {
                continue;
            };
            if counter.try_clean(&endpoints) {
                cleaned += 1;
            }
        }
        cleaned
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let cleaned = self.clean_once();
                        tracing::trace!(target: "counter", cleaned = cleaned, "counter_clean_pass");
                    }
                }
            }
            tracing::debug!(target: "counter", "counter_cleaner_stopped");
        })
    }
}
