use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicI64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};

/// A route as seen at one configuration version, with a lazily derived companion object.
#[derive(Debug)]
pub struct GatewayRoute<R, D, T> {
    id: String,
    route: Arc<R>,
    definition: D,
    version: i64,
    derived: OnceLock<Arc<T>>,
}

impl<R, D, T> GatewayRoute<R, D, T> {
    pub fn new(id: impl Into<String>, route: Arc<R>, definition: D, version: i64) -> Self {
        Self {
            id: id.into(),
            route,
            definition,
            version,
            derived: OnceLock::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn route(&self) -> &Arc<R> {
        &self.route
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Derived object computed once per instance; concurrent first callers share one result.
    pub fn get_or_create(&self, derive: impl FnOnce(&R, i64) -> T) -> Arc<T> {
        self.derived
            .get_or_init(|| Arc::new(derive(&self.route, self.version)))
            .clone()
    }

    pub fn derived(&self) -> Option<Arc<T>> {
        self.derived.get().cloned()
    }
}

/// Route id → cached route, plus the configuration version routes are stamped with.
pub struct GatewayRoutes<R, D, T> {
    routes: DashMap<String, Arc<GatewayRoute<R, D, T>>>,
    version: AtomicI64,
}

impl<R, D, T> Default for GatewayRoutes<R, D, T> {
    fn default() -> Self {
        Self {
            routes: DashMap::new(),
            version: AtomicI64::new(0),
        }
    }
}

impl<R, D: PartialEq, T> GatewayRoutes<R, D, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> i64 {
        self.version.load(Ordering::Acquire)
    }

    /// Marks a wholesale configuration change; returns the new version.
    pub fn upgrade(&self) -> i64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Caches `route` under `id`.
    ///
    /// An existing entry is replaced only when its route identity, its version
    /// and its definition all differ from the incoming ones; otherwise it is
    /// returned untouched. `definition` is only evaluated when needed, and never
    /// while a map lock is held. If another update lands first, its entry wins.
    pub fn update(
        &self,
        route: Arc<R>,
        id: &str,
        definition: impl FnOnce() -> D,
    ) -> Arc<GatewayRoute<R, D, T>> {
        let version = self.version();
        let seen = self.get(id);
        if let Some(existing) = &seen
            && (Arc::ptr_eq(&existing.route, &route) || existing.version == version)
        {
            return existing.clone();
        }
        let definition = definition();
        if let Some(existing) = &seen
            && existing.definition == definition
        {
            return existing.clone();
        }

        let cached = Arc::new(GatewayRoute::new(id, route, definition, version));
        match self.routes.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                let unchanged = seen.as_ref().is_some_and(|seen| Arc::ptr_eq(seen, entry.get()));
                if !unchanged {
                    return entry.get().clone();
                }
                entry.insert(cached.clone());
                tracing::debug!(target: "gateway", route_id = %id, version = version, "gateway_route_replaced");
                cached
            }
            Entry::Vacant(entry) => {
                entry.insert(cached.clone());
                cached
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<GatewayRoute<R, D, T>>> {
        self.routes.get(id).map(|route| route.clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<GatewayRoute<R, D, T>>> {
        self.routes.remove(id).map(|(_, route)| route)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
