mod admission;
mod lifecycle;
mod routing;

use std::sync::Arc;

use livegov::{
    config::EngineConfig,
    engine::GovernanceEngine,
    governance::{LoadSample, LoadSampler},
    live::{Location, UnitRouter},
    policy::{GovernancePolicy, SnapshotPolicySupplier},
};

struct IdleHost;

impl LoadSampler for IdleHost {
    fn sample(&self) -> LoadSample {
        LoadSample::default()
    }
}

pub fn location() -> Location {
    Location {
        live_space_id: Some("space".to_string()),
        unit: Some("east".to_string()),
        cell: Some("east-1".to_string()),
        lane_space_id: Some("lanes".to_string()),
        lane: Some("base".to_string()),
        ..Location::default()
    }
}

/// Engine plus the supplier it reads, for tests that reinstall policies.
pub fn engine_and_supplier(
    config: EngineConfig,
    document: &str,
) -> (GovernanceEngine, Arc<SnapshotPolicySupplier>) {
    let router = Arc::new(UnitRouter::with_defaults());
    let supplier = Arc::new(SnapshotPolicySupplier::new(router.clone()));
    supplier
        .install(GovernancePolicy::parse(document).expect("document should parse"))
        .expect("policy should install");
    let engine = GovernanceEngine::new(config, location(), supplier.clone(), router)
        .with_load_sampler(Arc::new(IdleHost));
    (engine, supplier)
}

pub fn engine_with(config: EngineConfig, document: &str) -> GovernanceEngine {
    engine_and_supplier(config, document).0
}

pub fn engine(document: &str) -> GovernanceEngine {
    engine_with(EngineConfig::default(), document)
}
