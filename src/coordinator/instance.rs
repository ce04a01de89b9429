use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use crate::calibration::{self, Calibration};
use crate::config::AppConfig;
use crate::device::{AdbDevice, Device};
use crate::errors::{PilotError, PilotResult};
use crate::navigator::{Cursor, MenuGraph, Navigator, NavigatorSettings, ProgressRecord, RunEnd};

pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_STARTUP: i32 = 1;
pub const EXIT_FAULT: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOutcome {
    Completed { battles: u32 },
    Stopped { battles: u32 },
    TimeLimit { battles: u32 },
    Fault(String),
}

impl InstanceOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            InstanceOutcome::Fault(_) => EXIT_FAULT,
            _ => EXIT_CLEAN,
        }
    }
}

/// Everything one device's pipeline owns. Never shared across instances.
pub struct InstanceContext {
    pub endpoint: String,
    pub run_id: Uuid,
    device: Arc<dyn Device>,
    navigator: Navigator,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
    stop: Arc<AtomicBool>,
}

impl InstanceContext {
    /// Load the device's calibration and build its navigator.
    pub fn build(config: &AppConfig, device: Arc<dyn Device>, stop: Arc<AtomicBool>) -> PilotResult<Self> {
        let calibration = calibration::load_for_device(&config.calibration, device.endpoint())?;
        Self::with_calibration(config, device, calibration, stop)
    }

    pub fn with_calibration(
        config: &AppConfig,
        device: Arc<dyn Device>,
        calibration: Calibration,
        stop: Arc<AtomicBool>,
    ) -> PilotResult<Self> {
        let endpoint = device.endpoint().to_string();
        let graph = MenuGraph::build(&config.topology, &config.navigation);
        let coverage = graph.validate(&calibration)?;
        tracing::info!(
            %endpoint,
            states = coverage.states,
            observable = coverage.observable,
            "menu graph ready"
        );

        let progress = ProgressRecord::new(&config.topology);
        let navigator = Navigator::new(
            device.clone(),
            graph,
            calibration,
            progress,
            NavigatorSettings::from_config(config),
            stop.clone(),
        );

        Ok(Self {
            endpoint,
            run_id: Uuid::new_v4(),
            device,
            navigator,
            reconnect_attempts: config.device.reconnect_attempts,
            reconnect_delay: Duration::from_secs(config.device.reconnect_delay_secs),
            stop,
        })
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub async fn run(&mut self) -> InstanceOutcome {
        let span = tracing::info_span!("instance", endpoint = %self.endpoint, run_id = %self.run_id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> InstanceOutcome {
        tracing::info!("instance started");
        let mut fault_streak = 0u32;
        let mut transitions_at_fault = u64::MAX;

        loop {
            match self.navigator.run().await {
                Ok(summary) => {
                    let battles = summary.stats.battles;
                    return match summary.end {
                        RunEnd::Exhausted => InstanceOutcome::Completed { battles },
                        RunEnd::Stopped => InstanceOutcome::Stopped { battles },
                        RunEnd::TimeLimit => InstanceOutcome::TimeLimit { battles },
                    };
                }
                Err(e) if e.is_device_fault() => {
                    let transitions = self.navigator.stats().transitions;
                    fault_streak = if transitions == transitions_at_fault { fault_streak + 1 } else { 1 };
                    transitions_at_fault = transitions;
                    tracing::warn!(error = %e, fault_streak, "device fault");

                    if fault_streak > self.reconnect_attempts {
                        tracing::error!("device keeps failing without progress; giving up");
                        return InstanceOutcome::Fault(format!("device lost: {e}"));
                    }
                    match self.reconnect().await {
                        Ok(()) => self.navigator.set_cursor(Cursor::Unsynced),
                        Err(PilotError::Cancelled) => {
                            return InstanceOutcome::Stopped {
                                battles: self.navigator.stats().battles,
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "reconnect failed");
                            return InstanceOutcome::Fault(format!("device lost: {e}"));
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "instance fault");
                    return InstanceOutcome::Fault(e.to_string());
                }
            }
        }
    }

    async fn reconnect(&self) -> PilotResult<()> {
        let mut last = None;
        for attempt in 1..=self.reconnect_attempts {
            tokio::time::sleep(self.reconnect_delay).await;
            if self.stop.load(Ordering::Relaxed) {
                return Err(PilotError::Cancelled);
            }
            match self.device.reconnect().await {
                Ok(()) => {
                    tracing::info!(attempt, "reconnected");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| PilotError::Device("no reconnect attempts configured".into())))
    }
}

/// Entry point of `menupilot instance`: returns the process exit code.
pub async fn run_instance(config: &AppConfig, endpoint: &str) -> i32 {
    let stop = Arc::new(AtomicBool::new(false));
    super::install_ctrl_c(stop.clone());

    let device: Arc<dyn Device> = Arc::new(AdbDevice::new(&config.device, endpoint));
    let mut ctx = match InstanceContext::build(config, device, stop) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(endpoint, error = %e, "instance failed to start");
            return EXIT_STARTUP;
        }
    };

    let outcome = ctx.run().await;
    match &outcome {
        InstanceOutcome::Fault(reason) => {
            tracing::error!(endpoint, %reason, "instance ended in fault")
        }
        other => tracing::info!(endpoint, outcome = ?other, "instance ended"),
    }
    outcome.exit_code()
}
