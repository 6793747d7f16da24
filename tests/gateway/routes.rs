use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use livegov::gateway::GatewayRoutes;

#[derive(Debug, PartialEq)]
struct RouteConfig {
    uri: String,
    predicates: Vec<String>,
}

fn route_config(uri: &str) -> Arc<RouteConfig> {
    Arc::new(RouteConfig {
        uri: uri.to_string(),
        predicates: vec!["Path=/orders/**".to_string()],
    })
}

type Routes = GatewayRoutes<RouteConfig, String, String>;

fn definition(route: &RouteConfig) -> String {
    format!("{} {:?}", route.uri, route.predicates)
}

#[test]
fn given_same_route_and_version_when_updated_twice_then_cached_entry_and_derived_value_are_reused() {
    let routes = Routes::new();
    let route = route_config("lb://order-service");

    let first = routes.update(route.clone(), "orders", || definition(&route));
    let derived = first.get_or_create(|route, version| format!("{}@{version}", route.uri));
    let second = routes.update(route.clone(), "orders", || {
        panic!("definition must not be rebuilt for an unchanged route")
    });

    assert!(Arc::ptr_eq(&first, &second));
    let again = second.get_or_create(|_, _| unreachable!("derived value is already cached"));
    assert!(Arc::ptr_eq(&derived, &again));
    assert_eq!(derived.as_str(), "lb://order-service@0");
}

#[test]
fn given_only_version_changed_when_updated_then_entry_is_kept() {
    let routes = Routes::new();
    let route = route_config("lb://order-service");
    let first = routes.update(route.clone(), "orders", || definition(&route));

    routes.upgrade();
    let second = routes.update(route.clone(), "orders", || definition(&route));

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.version(), 0);
}

#[test]
fn given_only_route_identity_changed_when_updated_then_entry_is_kept() {
    let routes = Routes::new();
    let route = route_config("lb://order-service");
    let first = routes.update(route.clone(), "orders", || definition(&route));

    let rebuilt = route_config("lb://order-service-v2");
    let second = routes.update(rebuilt.clone(), "orders", || definition(&rebuilt));

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn given_new_identity_and_version_with_equal_definition_when_updated_then_entry_is_kept() {
    let routes = Routes::new();
    let route = route_config("lb://order-service");
    let first = routes.update(route.clone(), "orders", || definition(&route));

    routes.upgrade();
    let equal = route_config("lb://order-service");
    let second = routes.update(equal.clone(), "orders", || definition(&equal));

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn given_identity_version_and_definition_all_changed_when_updated_then_entry_is_replaced() {
    let routes = Routes::new();
    let route = route_config("lb://order-service");
    let first = routes.update(route.clone(), "orders", || definition(&route));
    first.get_or_create(|route, _| route.uri.clone());

    let version = routes.upgrade();
    let changed = route_config("lb://order-service-canary");
    let second = routes.update(changed.clone(), "orders", || definition(&changed));

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.version(), version);
    assert!(Arc::ptr_eq(second.route(), &changed));
    assert!(second.derived().is_none(), "derived value is rebuilt lazily");
    let cached = routes.get("orders").expect("route cached");
    assert!(Arc::ptr_eq(&cached, &second));
}

#[test]
fn given_cached_routes_when_removed_then_lookups_miss() {
    let routes = Routes::new();
    let orders = route_config("lb://order-service");
    let billing = route_config("lb://billing");
    routes.update(orders.clone(), "orders", || definition(&orders));
    routes.update(billing.clone(), "billing", || definition(&billing));
    assert_eq!(routes.len(), 2);

    let removed = routes.remove("orders").expect("route was cached");

    assert_eq!(removed.id(), "orders");
    assert!(routes.get("orders").is_none());
    assert_eq!(routes.len(), 1);
}

#[test]
fn given_concurrent_first_callers_when_deriving_then_derive_runs_once() {
    let routes = Routes::new();
    let route = route_config("lb://order-service");
    let cached = routes.update(route.clone(), "orders", || definition(&route));
    let calls = AtomicUsize::new(0);

    let derived: Vec<Arc<String>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    cached.get_or_create(|route, _| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        route.uri.clone()
                    })
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("derive thread should not panic"))
            .collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(derived.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

#[test]
fn given_definition_that_reads_the_cache_when_updated_then_update_completes() {
    let routes = Routes::new();
    let route = route_config("lb://order-service");
    let first = routes.update(route.clone(), "orders", || {
        assert!(routes.get("orders").is_none());
        assert_eq!(routes.len(), 0);
        definition(&route)
    });

    routes.upgrade();
    let changed = route_config("lb://order-service-canary");
    let second = routes.update(changed.clone(), "orders", || {
        let current = routes.get("orders").expect("first entry still cached");
        assert!(Arc::ptr_eq(&current, &first));
        definition(&changed)
    });

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&routes.get("orders").expect("route cached"), &second));
}
