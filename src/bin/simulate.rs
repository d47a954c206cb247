//! Simulated deployment run.
//!
//! Injects a scripted provider into an in-memory host slot after a delay, then
//! resolves one create and one attach against it and logs every state change.
//!
//! # Environment Variables
//!
//! - `DEPLOY_*`: connector settings, see `ConnectorConfig::from_env`
//! - `SIM_INJECT_DELAY_MS`: delay before the provider appears (default: 500)
//! - `SIM_PROVIDER_VERSION`: advertised protocol version (default: "1.0.0")
//! - `RUST_LOG`: tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin capability-deploy-sim
//! # or with a YAML connector config:
//! cargo run --bin capability-deploy-sim -- connector.yaml
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use capability_deploy::connector::simulated::{
    InMemorySlot, SimulatedCapability, SimulatedProvider,
};
use capability_deploy::{
    CapabilityChain, ConnectorConfig, DeploymentRegistry, DeploymentStateMachine, ResourceConfig,
};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,capability_deploy=debug".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ConnectorConfig::from_yaml_file(&path)
            .with_context(|| format!("loading connector config from {}", path))?,
        None => ConnectorConfig::from_env(),
    };
    let inject_delay = env_ms("SIM_INJECT_DELAY_MS", 500);
    let version =
        std::env::var("SIM_PROVIDER_VERSION").unwrap_or_else(|_| "1.0.0".to_string());

    let capability = Arc::new(SimulatedCapability::new().with_addresses(["addr-123"]));
    let provider = SimulatedProvider::new(version)
        .with_activation_delay(Duration::from_millis(300))
        .with_capability(capability.clone());

    let slot = Arc::new(InMemorySlot::new());
    slot.inject_after(Duration::from_millis(inject_delay), Arc::new(provider));

    let chain = CapabilityChain::new(slot, config).context("invalid connector config")?;
    let mut statuses = chain.watch_status();
    tokio::spawn(async move {
        while let Some(status) = statuses.next().await {
            tracing::info!(?status, "connection status");
        }
    });

    let registry = DeploymentRegistry::with_submitting_operations(chain);
    let created = registry.resolve(
        None,
        Some(ResourceConfig::new(json!({
            "maxMembers": 10,
            "contributionAmount": 1000,
        }))),
    );
    let attached = registry.resolve(Some("addr-77".into()), None);

    tokio::join!(watch("create", &created), watch("attach", &attached));

    tracing::info!(
        deployments = registry.len(),
        submissions = capability.submissions(),
        "simulation finished"
    );
    Ok(())
}

async fn watch(label: &str, machine: &DeploymentStateMachine) {
    let mut states = machine.subscribe();
    while let Some(state) = states.next().await {
        match serde_json::to_string(&state) {
            Ok(json) => tracing::info!(deployment = %machine.id(), "{}: {}", label, json),
            Err(e) => tracing::warn!("{}: unserializable state: {}", label, e),
        }
    }
}

fn env_ms(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
