use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::DeviceConfig;
use crate::device::traits::{Device, KeyCode};
use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{Point, Screenshot};

/// Run one adb invocation with a hard timeout. A non-zero exit is returned as
/// `Ok` so callers can inspect stdout; only spawn failures and timeouts error.
pub async fn run_adb(adb_path: &str, args: &[&str], timeout: Duration) -> PilotResult<Output> {
    let mut cmd = Command::new(adb_path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(PilotError::Device(format!("failed to run {adb_path}: {e}"))),
        Err(_) => Err(PilotError::Device(format!(
            "adb {} timed out after {}s",
            args.join(" "),
            timeout.as_secs()
        ))),
    }
}

/// A device reached through `adb -s <serial>`.
pub struct AdbDevice {
    adb_path: String,
    serial: String,
    timeout: Duration,
}

impl AdbDevice {
    pub fn new(cfg: &DeviceConfig, serial: impl Into<String>) -> Self {
        Self {
            adb_path: cfg.adb_path.clone(),
            serial: serial.into(),
            timeout: Duration::from_secs(cfg.command_timeout_secs),
        }
    }

    async fn exec(&self, args: &[&str]) -> PilotResult<Output> {
        let mut full = vec!["-s", self.serial.as_str()];
        full.extend_from_slice(args);
        let output = run_adb(&self.adb_path, &full, self.timeout).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PilotError::Device(format!(
                "{}: adb {} failed: {}",
                self.serial,
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(output)
    }

    async fn input(&self, args: &[String]) -> PilotResult<()> {
        let mut full: Vec<&str> = vec!["shell", "input"];
        full.extend(args.iter().map(String::as_str));
        self.exec(&full).await.map(|_| ())
    }
}

#[async_trait]
impl Device for AdbDevice {
    fn endpoint(&self) -> &str {
        &self.serial
    }

    async fn capture(&self) -> PilotResult<Screenshot> {
        let output = self.exec(&["exec-out", "screencap", "-p"]).await?;
        Screenshot::decode(&output.stdout).map_err(|e| {
            PilotError::Device(format!("{}: unreadable screenshot: {e}", self.serial))
        })
    }

    async fn tap(&self, at: Point) -> PilotResult<()> {
        tracing::debug!(device = %self.serial, x = at.x, y = at.y, "tap");
        self.input(&["tap".into(), at.x.to_string(), at.y.to_string()])
            .await
    }

    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> PilotResult<()> {
        tracing::debug!(device = %self.serial, %from, %to, ms = duration.as_millis() as u64, "swipe");
        self.input(&[
            "swipe".into(),
            from.x.to_string(),
            from.y.to_string(),
            to.x.to_string(),
            to.y.to_string(),
            duration.as_millis().to_string(),
        ])
        .await
    }

    async fn send_key(&self, key: KeyCode) -> PilotResult<()> {
        self.input(&["keyevent".into(), key.code().to_string()]).await
    }

    async fn reconnect(&self) -> PilotResult<()> {
        // Only TCP endpoints can be reconnected; USB serials just get re-verified.
        if self.serial.contains(':') {
            let _ = run_adb(&self.adb_path, &["disconnect", &self.serial], self.timeout).await;
            let output = run_adb(&self.adb_path, &["connect", &self.serial], self.timeout).await?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !super::discovery::connect_succeeded(&stdout) {
                return Err(PilotError::Device(format!(
                    "{}: reconnect refused: {}",
                    self.serial,
                    stdout.trim()
                )));
            }
        }
        let output = self.exec(&["shell", "echo", "ok"]).await?;
        if String::from_utf8_lossy(&output.stdout).trim() != "ok" {
            return Err(PilotError::Device(format!("{}: device not responding", self.serial)));
        }
        tracing::info!(device = %self.serial, "device reconnected");
        Ok(())
    }
}
