use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    menupilot_lib::run().await
}
