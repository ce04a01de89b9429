use std::time::Duration;

use regex::Regex;

use crate::config::{DeviceConfig, DiscoveryConfig};
use crate::device::adb::run_adb;
use crate::errors::{PilotError, PilotResult};

/// Serials from `adb devices` output that are online (state `device`).
pub fn parse_device_list(stdout: &str) -> Vec<String> {
    let re = match Regex::new(r"(?m)^(\S+)\s+device\s*$") {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    re.captures_iter(stdout)
        .map(|c| c[1].to_string())
        .collect()
}

/// Interpret `adb connect` output. "already connected" counts as success.
pub fn connect_succeeded(stdout: &str) -> bool {
    let out = stdout.to_lowercase();
    if out.contains("already connected") {
        return true;
    }
    out.contains("connected") && !out.contains("cannot") && !out.contains("refused") && !out.contains("failed")
}

pub fn candidate_ports(cfg: &DiscoveryConfig) -> Vec<String> {
    (0..cfg.max_instances)
        .filter_map(|i| {
            let port = cfg.base_port as u32 + i as u32 * cfg.port_increment as u32;
            u16::try_from(port).ok()
        })
        .map(|port| format!("{}:{}", cfg.host, port))
        .collect()
}

pub async fn list_devices(device: &DeviceConfig) -> PilotResult<Vec<String>> {
    let output = run_adb(
        &device.adb_path,
        &["devices"],
        Duration::from_secs(device.command_timeout_secs),
    )
    .await?;
    if !output.status.success() {
        return Err(PilotError::Device(format!(
            "adb devices failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
}

/// A device is usable when a trivial shell command round-trips.
pub async fn verify_device(device: &DeviceConfig, serial: &str, timeout: Duration) -> bool {
    match run_adb(&device.adb_path, &["-s", serial, "shell", "echo", "test"], timeout).await {
        Ok(output) => output.status.success() && String::from_utf8_lossy(&output.stdout).contains("test"),
        Err(_) => false,
    }
}

/// Connect to every emulator port that answers, then merge with devices adb
/// already knows about. Order: scanned ports first, then the rest.
pub async fn discover_endpoints(device: &DeviceConfig, discovery: &DiscoveryConfig) -> PilotResult<Vec<String>> {
    let verify_timeout = Duration::from_secs(discovery.verify_timeout_secs);
    let mut found: Vec<String> = Vec::new();

    if discovery.scan_ports {
        for address in candidate_ports(discovery) {
            let output = match run_adb(&device.adb_path, &["connect", &address], verify_timeout).await {
                Ok(o) => o,
                Err(e) => {
                    tracing::debug!(%address, error = %e, "connect attempt failed");
                    continue;
                }
            };
            let stdout = String::from_utf8_lossy(&output.stdout);
            if connect_succeeded(&stdout) && verify_device(device, &address, verify_timeout).await {
                tracing::info!(%address, "emulator instance connected");
                found.push(address);
            } else {
                tracing::debug!(%address, output = %stdout.trim(), "no emulator on port");
            }
        }
    }

    for serial in list_devices(device).await? {
        if !found.contains(&serial) {
            tracing::info!(%serial, "device already attached");
            found.push(serial);
        }
    }

    Ok(found)
}
