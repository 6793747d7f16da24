use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};

use livegov::{
    cli::config_path_from_args,
    config::Config,
    counter::StaticEndpointSupplier,
    engine::GovernanceEngine,
    live::UnitRouter,
    logging::init_tracing,
    policy::{GovernancePolicy, SnapshotPolicySupplier},
};

fn install_policy(supplier: &SnapshotPolicySupplier, path: &Path) -> Result<i64> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read policy document {}", path.display()))?;
    let policy = GovernancePolicy::parse(&text)
        .with_context(|| format!("failed to parse policy document {}", path.display()))?;
    let version = supplier
        .install(policy)
        .with_context(|| format!("policy document {} was rejected", path.display()))?;
    Ok(version)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let logging_guard = init_tracing(&config.logging)?;

    let router = Arc::new(UnitRouter::with_defaults());
    let supplier = Arc::new(SnapshotPolicySupplier::new(router.clone()));
    if let Some(policy_path) = config.policy_path.as_deref() {
        install_policy(&supplier, policy_path)?;
    }

    let engine = GovernanceEngine::new(
        config.engine.clone(),
        config.location.clone(),
        supplier.clone(),
        router,
    );
    engine.start_cleaner(Arc::new(StaticEndpointSupplier::from_entries(
        config.endpoints.clone(),
    )));
    tracing::info!(
        target: "livegov",
        run_id = %logging_guard.run_id(),
        policy_version = supplier.version(),
        "livegov_started"
    );

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;
    let mut sighup = signal(SignalKind::hangup()).context("unable to listen for SIGHUP")?;

    let signal_name = loop {
        tokio::select! {
            _ = sigint.recv() => break "SIGINT",
            _ = sigterm.recv() => break "SIGTERM",
            _ = sighup.recv() => {
                let Some(policy_path) = config.policy_path.as_deref() else {
                    continue;
                };
                if let Err(err) = install_policy(&supplier, policy_path) {
                    tracing::warn!(target: "livegov", error = %format!("{err:#}"), "policy_reload_failed");
                }
            }
        }
    };

    tracing::info!(target: "livegov", signal = signal_name, "shutdown_requested");
    let drained = engine
        .drain(Duration::from_millis(config.engine.drain_timeout_ms))
        .await;
    engine.shutdown().await;
    tracing::info!(
        target: "livegov",
        signal = signal_name,
        drained = drained,
        "livegov_stopped"
    );
    Ok(())
}
