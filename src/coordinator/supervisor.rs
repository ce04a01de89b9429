//! Launches one `instance` child process per endpoint and waits for all of
//! them. Instances share nothing; a failing child never affects the others.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::process::Command;

use crate::errors::PilotResult;

#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: PathBuf,
    /// Arguments placed before the `instance` subcommand.
    pub base_args: Vec<String>,
    pub config_path: Option<PathBuf>,
    pub endpoints: Vec<String>,
    pub stagger: Duration,
}

impl LaunchPlan {
    /// Plan that re-invokes the running executable.
    pub fn for_current_exe(
        endpoints: Vec<String>,
        stagger: Duration,
        config_path: Option<PathBuf>,
    ) -> PilotResult<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            base_args: Vec::new(),
            config_path,
            endpoints,
            stagger,
        })
    }

    pub fn command(&self, endpoint: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("instance")
            .arg("--device")
            .arg(endpoint);
        if let Some(path) = &self.config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceTerminal {
    /// Never launched because a stop was requested first.
    NotStarted,
    LaunchFailed(String),
    Clean,
    /// Nonzero exit, or killed by a signal (`None`).
    Fault(Option<i32>),
}

#[derive(Debug, Clone)]
pub struct InstanceReport {
    pub endpoint: String,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub terminal: InstanceTerminal,
}

impl InstanceReport {
    fn pending(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            pid: None,
            started_at: None,
            finished_at: None,
            terminal: InstanceTerminal::NotStarted,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(
            self.terminal,
            InstanceTerminal::LaunchFailed(_) | InstanceTerminal::Fault(_)
        )
    }
}

fn terminal_of(status: std::io::Result<ExitStatus>) -> InstanceTerminal {
    match status {
        Ok(s) if s.success() => InstanceTerminal::Clean,
        Ok(s) => InstanceTerminal::Fault(s.code()),
        Err(e) => InstanceTerminal::LaunchFailed(format!("wait failed: {e}")),
    }
}

/// Launch every endpoint `stagger` apart, then wait for all children.
/// Reports come back in endpoint order.
pub async fn supervise(plan: &LaunchPlan, stop: Arc<AtomicBool>) -> Vec<InstanceReport> {
    let total = plan.endpoints.len();
    let mut reports: Vec<InstanceReport> =
        plan.endpoints.iter().map(|e| InstanceReport::pending(e)).collect();
    let mut running = FuturesUnordered::new();

    for (i, endpoint) in plan.endpoints.iter().enumerate() {
        if i > 0 && !plan.stagger.is_zero() {
            tokio::time::sleep(plan.stagger).await;
        }
        if stop.load(Ordering::Relaxed) {
            tracing::warn!(remaining = total - i, "stop requested; not launching remaining instances");
            break;
        }

        match plan.command(endpoint).spawn() {
            Ok(mut child) => {
                let pid = child.id();
                reports[i].pid = pid;
                reports[i].started_at = Some(Utc::now());
                tracing::info!(endpoint = %endpoint, pid = ?pid, index = i + 1, total, "instance launched");
                running.push(async move { (i, child.wait().await) });
            }
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "failed to launch instance");
                reports[i].terminal = InstanceTerminal::LaunchFailed(e.to_string());
            }
        }
    }

    while let Some((i, status)) = running.next().await {
        let report = &mut reports[i];
        report.finished_at = Some(Utc::now());
        report.terminal = terminal_of(status);
        match &report.terminal {
            InstanceTerminal::Clean => {
                tracing::info!(endpoint = %report.endpoint, "instance finished cleanly")
            }
            other => tracing::warn!(endpoint = %report.endpoint, terminal = ?other, "instance ended in fault"),
        }
    }

    log_summary(&reports);
    reports
}

fn log_summary(reports: &[InstanceReport]) {
    let faults = reports.iter().filter(|r| r.is_fault()).count();
    let clean = reports
        .iter()
        .filter(|r| r.terminal == InstanceTerminal::Clean)
        .count();
    tracing::info!(total = reports.len(), clean, faults, "all instances finished");
    for r in reports {
        let runtime = match (r.started_at, r.finished_at) {
            (Some(a), Some(b)) => Some((b - a).num_seconds()),
            _ => None,
        };
        tracing::info!(endpoint = %r.endpoint, terminal = ?r.terminal, runtime_secs = ?runtime, "instance report");
    }
}

/// Coordinator exit code: nonzero when any instance faulted or failed to launch.
pub fn exit_code(reports: &[InstanceReport]) -> i32 {
    if reports.iter().any(InstanceReport::is_fault) {
        1
    } else {
        0
    }
}
