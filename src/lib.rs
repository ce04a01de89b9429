pub mod calibration;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod errors;
pub mod navigator;
pub mod perception;

#[cfg(test)]
pub mod testing;

use std::process::ExitCode;

use clap::Parser;

use crate::commands::Cli;

pub async fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let code = commands::dispatch(cli).await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
