use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{self, AppConfig};
use crate::coordinator::{self, instance, supervisor, LaunchPlan};
use crate::device::discovery;
use crate::errors::PilotResult;

#[derive(Parser, Debug)]
#[command(
    name = "menupilot",
    version,
    about = "Drive game menus on emulated Android devices from screenshots",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Path to config.toml (default: next to the executable, then the working directory)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub launch: LaunchArgs,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Args, Debug, Default)]
pub struct LaunchArgs {
    /// Delay between instance launches; overrides `coordinator.stagger_secs`
    #[arg(long, value_name = "SECS")]
    pub stagger_secs: Option<u64>,

    /// Device endpoint to launch; repeatable. Skips discovery.
    #[arg(long = "endpoint", value_name = "EP")]
    pub endpoints: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run a single navigation instance against one device
    Instance {
        #[arg(long, value_name = "EP")]
        device: String,
    },
    /// List responsive devices
    Devices,
}

/// Run the parsed command line; returns the process exit code.
pub async fn dispatch(cli: Cli) -> i32 {
    let config = match config::load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return 1;
        }
    };

    match cli.command {
        Some(CliCommand::Instance { device }) => instance::run_instance(&config, &device).await,
        Some(CliCommand::Devices) => match list_devices(&config).await {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "device listing failed");
                1
            }
        },
        None => match launch_all(&config, cli.config, cli.launch).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %e, "coordinator failed");
                1
            }
        },
    }
}

async fn launch_all(config: &AppConfig, config_path: Option<PathBuf>, args: LaunchArgs) -> PilotResult<i32> {
    let endpoints = coordinator::resolve_endpoints(config, &args.endpoints).await?;
    if endpoints.is_empty() {
        tracing::error!("no devices found; start the emulators or pass --endpoint");
        return Ok(1);
    }

    let stagger = Duration::from_secs(args.stagger_secs.unwrap_or(config.coordinator.stagger_secs));
    tracing::info!(count = endpoints.len(), stagger_secs = stagger.as_secs(), endpoints = ?endpoints, "launching instances");

    let plan = LaunchPlan::for_current_exe(endpoints, stagger, config_path)?;
    let stop = Arc::new(AtomicBool::new(false));
    coordinator::install_ctrl_c(stop.clone());

    let reports = supervisor::supervise(&plan, stop).await;
    Ok(supervisor::exit_code(&reports))
}

async fn list_devices(config: &AppConfig) -> PilotResult<()> {
    let endpoints = discovery::discover_endpoints(&config.device, &config.discovery).await?;
    if endpoints.is_empty() {
        println!("no devices found");
    }
    for ep in endpoints {
        println!("{ep}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_launches_all() {
        let cli = Cli::try_parse_from(["menupilot", "--stagger-secs", "2", "--endpoint", "a", "--endpoint", "b"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.launch.stagger_secs, Some(2));
        assert_eq!(cli.launch.endpoints, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn instance_subcommand_accepts_trailing_config() {
        let cli = Cli::try_parse_from(["menupilot", "instance", "--device", "127.0.0.1:16384", "--config", "c.toml"]).unwrap();
        assert!(matches!(cli.command, Some(CliCommand::Instance { ref device }) if device == "127.0.0.1:16384"));
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }

    #[test]
    fn launch_flags_conflict_with_subcommands() {
        assert!(Cli::try_parse_from(["menupilot", "--endpoint", "a", "devices"]).is_err());
        assert!(Cli::try_parse_from(["menupilot", "instance"]).is_err());
    }
}
