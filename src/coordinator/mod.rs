pub mod instance;
pub mod supervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::device::discovery;
use crate::errors::PilotResult;

pub use instance::{run_instance, InstanceContext, InstanceOutcome};
pub use supervisor::{supervise, InstanceReport, InstanceTerminal, LaunchPlan};

/// Set `stop` on Ctrl-C. The navigator finishes its current tick and exits.
pub fn install_ctrl_c(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping after the current step");
            stop.store(true, Ordering::Relaxed);
        }
    });
}

/// Endpoints to launch: command-line ones first, then the configured list,
/// then whatever discovery finds. Duplicates are dropped, order kept.
pub async fn resolve_endpoints(config: &AppConfig, explicit: &[String]) -> PilotResult<Vec<String>> {
    let source = if !explicit.is_empty() {
        tracing::info!(count = explicit.len(), "using endpoints from the command line");
        explicit.to_vec()
    } else if !config.coordinator.endpoints.is_empty() {
        tracing::info!(count = config.coordinator.endpoints.len(), "using configured endpoints");
        config.coordinator.endpoints.clone()
    } else {
        tracing::info!("no endpoints given; discovering devices");
        discovery::discover_endpoints(&config.device, &config.discovery).await?
    };
    Ok(dedup(source))
}

fn dedup(endpoints: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(endpoints.len());
    for ep in endpoints {
        let ep = ep.trim().to_string();
        if !ep.is_empty() && !out.contains(&ep) {
            out.push(ep);
        }
    }
    out
}
